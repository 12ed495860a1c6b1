//! The per-run context shared by the driver, the gates and every worker.

use crate::cancellation::CancellationToken;
use crate::config::PipelineConfig;
use crate::events::EventSink;
use crate::fault::FaultState;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// State owned by one pipeline run.
///
/// A fresh context is created for every run and handed explicitly to each
/// gate and worker. Nothing is process-global, so independent runs never
/// interfere.
pub struct RunContext {
    /// Unique id of this run.
    run_id: Uuid,
    /// Run configuration.
    config: PipelineConfig,
    /// Cancelled when the caller abandons the run.
    cancel: CancellationToken,
    /// Set by the first worker that faults.
    fault: FaultState,
    /// Event sink for lifecycle events.
    event_sink: Arc<dyn EventSink>,
}

impl RunContext {
    /// Creates a new run context.
    #[must_use]
    pub fn new(config: PipelineConfig, event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            config,
            cancel: CancellationToken::new(),
            fault: FaultState::new(),
            event_sink,
        }
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the shared fault state.
    #[must_use]
    pub fn fault(&self) -> &FaultState {
        &self.fault
    }

    /// Returns true once workers should stop: the run was abandoned or a
    /// worker faulted.
    #[must_use]
    pub fn should_halt(&self) -> bool {
        self.cancel.is_cancelled() || self.fault.is_faulted()
    }

    /// Emits an event tagged with the run id.
    ///
    /// Never panics: a panicking sink is logged and the event is dropped.
    pub fn emit(&self, event_type: &str, mut data: serde_json::Value) {
        if let serde_json::Value::Object(ref mut map) = data {
            map.insert(
                "run_id".to_string(),
                serde_json::Value::String(self.run_id.to_string()),
            );
        }

        let sink = &self.event_sink;
        if let Err(e) = panic::catch_unwind(AssertUnwindSafe(|| sink.emit(event_type, Some(data)))) {
            warn!(run_id = %self.run_id, event_type, "Event sink panicked: {:?}", e);
        }
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("faulted", &self.fault.is_faulted())
            .finish_non_exhaustive()
    }
}
