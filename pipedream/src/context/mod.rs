//! Per-run execution context.
//!
//! This module provides:
//! - The run context shared by the driver, gates and workers

mod run;

pub use run::RunContext;
