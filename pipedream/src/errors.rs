//! Error types for the pipedream engine.
//!
//! Graph problems are reported synchronously while a pipeline is being
//! wired, before any worker exists. Faults raised inside workers are turned
//! into [`FaultReport`] values and surfaced once, by the driver, as
//! [`PipelineError::Fault`].

use crate::fault::FaultReport;
use thiserror::Error;

/// The main error type for pipedream operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A transform, predicate or source failed inside a worker.
    #[error("{0}")]
    Fault(#[from] PipelineFault),

    /// The stage graph contains a dependency cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// The stage graph could not be wired.
    #[error("{0}")]
    Construction(#[from] GraphConstructionError),

    /// The pipeline configuration is invalid.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl PipelineError {
    /// Returns the fault report if this error came from a worker.
    #[must_use]
    pub fn fault_report(&self) -> Option<&FaultReport> {
        match self {
            Self::Fault(fault) => Some(&fault.report),
            _ => None,
        }
    }

    /// Returns true if the error was raised while building the graph.
    #[must_use]
    pub fn is_construction_error(&self) -> bool {
        matches!(self, Self::CycleDetected(_) | Self::Construction(_))
    }
}

/// A fault raised by user code in one of the pipeline's workers.
///
/// The original error value never leaves its worker; what crosses the thread
/// boundary is the tagged report (kind, message and trace text).
#[derive(Debug, Clone, Error)]
#[error("{}: {}\n\nOriginal trace:\n{}", report.kind, report.message, report.trace)]
pub struct PipelineFault {
    /// The captured report.
    pub report: FaultReport,
}

impl PipelineFault {
    /// Wraps a captured report.
    #[must_use]
    pub fn new(report: FaultReport) -> Self {
        Self { report }
    }

    /// The kind of the original fault (an error type name or `"panic"`).
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.report.kind
    }

    /// The message of the original fault.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.report.message
    }

    /// The name of the stage whose worker faulted.
    #[must_use]
    pub fn stage(&self) -> &str {
        &self.report.stage
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

/// Error raised when stage descriptors cannot be turned into a wired graph.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct GraphConstructionError {
    /// Stable error code (e.g. `GRAPH-002-NO_UPSTREAM`).
    pub code: &'static str,
    /// Human readable message.
    pub message: String,
    /// The stages involved.
    pub stages: Vec<String>,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
}

impl GraphConstructionError {
    /// Creates a new construction error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            stages: Vec::new(),
            fix_hint: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// A stage was configured with zero workers.
    #[must_use]
    pub fn no_workers(stage: &str) -> Self {
        Self::new(
            "GRAPH-003-NO_WORKERS",
            format!("Stage '{stage}' has no workers"),
        )
        .with_stages(vec![stage.to_string()])
        .with_fix_hint("Every stage needs at least one worker.")
    }

    /// A stage asked for a bounded queue larger than a gate can hold.
    #[must_use]
    pub fn capacity_too_large(stage: &str, capacity: usize) -> Self {
        Self::new(
            "GRAPH-007-CAPACITY",
            format!(
                "Stage '{stage}' capacity {capacity} exceeds the maximum of {}",
                crate::channel::MAX_CAPACITY
            ),
        )
        .with_stages(vec![stage.to_string()])
        .with_fix_hint("Use a smaller capacity, or 0 for an unbounded queue.")
    }

    /// A consuming stage was built without any upstream stage.
    #[must_use]
    pub fn no_upstream(stage: &str) -> Self {
        Self::new(
            "GRAPH-002-NO_UPSTREAM",
            format!("Stage '{stage}' consumes items but has no upstream stage"),
        )
        .with_stages(vec![stage.to_string()])
        .with_fix_hint("Pass at least one stage to merge().")
    }

    /// A descriptor was wired against a stage with a different item type.
    #[must_use]
    pub fn type_mismatch(producer: &str, consumer: &str) -> Self {
        Self::new(
            "GRAPH-004-TYPE_MISMATCH",
            format!("Stage '{consumer}' cannot consume the items produced by '{producer}'"),
        )
        .with_stages(vec![producer.to_string(), consumer.to_string()])
    }

    /// A pipeline was run without terminal stages.
    #[must_use]
    pub fn empty() -> Self {
        Self::new("GRAPH-005-EMPTY", "Pipeline has no terminal stage")
            .with_fix_hint("Pass at least one stage to Pipeline::with_terminals().")
    }
}
