//! Operation kind and worker status types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The operation a stage performs on its items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Produces items from a user-supplied iterator; has no upstream.
    Source,
    /// Applies a function to every item.
    Map,
    /// Keeps only the items matching a predicate.
    Filter,
    /// Passes through the union of several upstream streams.
    Merge,
}

impl OperationKind {
    /// Returns true if stages of this kind read from an input gate.
    #[must_use]
    pub fn consumes_input(self) -> bool {
        !matches!(self, Self::Source)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::Map => write!(f, "map"),
            Self::Filter => write!(f, "filter"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// A point-in-time view of a stage's workers within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    /// Workers spawned for the stage.
    pub workers: usize,
    /// Workers whose thread has not yet exited.
    pub active_workers: usize,
}

impl StageStatus {
    /// Returns true once every worker of the stage has exited.
    #[must_use]
    pub fn done(&self) -> bool {
        self.active_workers == 0
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} workers active", self.active_workers, self.workers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_display() {
        assert_eq!(OperationKind::Source.to_string(), "source");
        assert_eq!(OperationKind::Merge.to_string(), "merge");
    }

    #[test]
    fn test_operation_kind_serde() {
        let json = serde_json::to_string(&OperationKind::Filter).unwrap();
        assert_eq!(json, "\"filter\"");

        let kind: OperationKind = serde_json::from_str("\"map\"").unwrap();
        assert_eq!(kind, OperationKind::Map);
    }

    #[test]
    fn test_only_sources_skip_input() {
        assert!(!OperationKind::Source.consumes_input());
        assert!(OperationKind::Map.consumes_input());
        assert!(OperationKind::Filter.consumes_input());
        assert!(OperationKind::Merge.consumes_input());
    }

    #[test]
    fn test_stage_status_done() {
        let running = StageStatus { workers: 3, active_workers: 1 };
        assert!(!running.done());
        assert_eq!(running.to_string(), "1/3 workers active");

        let finished = StageStatus { workers: 3, active_workers: 0 };
        assert!(finished.done());
    }
}
