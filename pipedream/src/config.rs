//! Pipeline run configuration.

use crate::channel::MAX_CAPACITY;
use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single pipeline run.
///
/// Stage-level parameters (worker count, queue capacity) live on the stage
/// descriptors; this only covers the driver and the runtime shared by every
/// worker of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of the driver's collection gate (0 = unbounded).
    #[serde(default)]
    pub output_capacity: usize,
    /// How long a consumer sleeps after finding its input gate empty.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long a producer waits between attempts to put into a full gate.
    #[serde(default = "default_put_retry_interval_ms")]
    pub put_retry_interval_ms: u64,
    /// Prefix of every worker thread name.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_put_retry_interval_ms() -> u64 {
    1
}

fn default_thread_name_prefix() -> String {
    "pipedream".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_capacity: 0,
            poll_interval_ms: default_poll_interval_ms(),
            put_retry_interval_ms: default_put_retry_interval_ms(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the capacity of the driver's collection gate.
    #[must_use]
    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }

    /// Sets the empty-gate poll interval.
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the full-gate retry interval.
    #[must_use]
    pub fn with_put_retry_interval_ms(mut self, ms: u64) -> Self {
        self.put_retry_interval_ms = ms;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Gets the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Gets the put retry interval as a Duration.
    #[must_use]
    pub fn put_retry_interval(&self) -> Duration {
        Duration::from_millis(self.put_retry_interval_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if an interval is zero, the
    /// output capacity exceeds [`MAX_CAPACITY`] or the thread name prefix is
    /// empty.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.output_capacity > MAX_CAPACITY {
            return Err(PipelineError::InvalidConfig(format!(
                "output_capacity must not exceed {MAX_CAPACITY}"
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.put_retry_interval_ms == 0 {
            return Err(PipelineError::InvalidConfig(
                "put_retry_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.thread_name_prefix.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "thread_name_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.output_capacity, 0);
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.thread_name_prefix, "pipedream");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"output_capacity": 8}"#).unwrap();

        assert_eq!(config, PipelineConfig::new().with_output_capacity(8));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        assert!(PipelineConfig::new().with_poll_interval_ms(0).validate().is_err());
        assert!(PipelineConfig::new()
            .with_put_retry_interval_ms(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_output_capacity() {
        let err = PipelineConfig::new()
            .with_output_capacity(usize::MAX)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
        assert!(PipelineConfig::new()
            .with_output_capacity(MAX_CAPACITY)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_blank_prefix() {
        let err = PipelineConfig::new()
            .with_thread_name_prefix("  ")
            .validate()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
