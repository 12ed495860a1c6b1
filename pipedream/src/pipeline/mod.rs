//! Pipeline wiring and execution.
//!
//! This module provides:
//! - Graph wiring from terminal descriptors
//! - Worker threads with fault capture
//! - The driver that runs a graph and streams its output

mod driver;
pub(crate) mod graph;
pub(crate) mod worker;


pub use driver::{Pipeline, PipelineRun};
