//! # Pipedream
//!
//! A composable, parallel dataflow engine.
//!
//! A pipeline is described by chaining immutable stage descriptors: sources
//! produce items, `map` and `filter` transform them, `merge` unions several
//! streams. Running a pipeline spawns a pool of worker threads per stage,
//! connects the stages with bounded fan-in gates and streams the terminal
//! stages' output back to the caller.
//!
//! - **Composable descriptors**: a descriptor can be reused, forked to
//!   several consumers and merged back
//! - **Per-stage parallelism**: every stage runs its own number of workers
//! - **Backpressure**: a bounded input buffer blocks upstream producers
//! - **Fail fast**: the first fault in any worker stops the run and is
//!   surfaced to the caller exactly once
//!
//! Output order is not defined. There are no retries: on success every item
//! is delivered exactly once per path from a source to a terminal, and a
//! fault stops delivery early, so a faulted run delivers at most once.
//!
//! ## Quick Start
//!
//! ```rust
//! use pipedream::prelude::*;
//!
//! let numbers = from_iter(1..=5);
//! let tens = numbers | map(|x: i32| x * 10).workers(2);
//! let big = tens | filter(|x: &i32| *x > 10);
//!
//! let mut items = big.collect().unwrap();
//! items.sort();
//! assert_eq!(items, vec![20, 30, 40, 50]);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod channel;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod fault;
pub mod observability;
pub mod operators;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::PipelineConfig;
    pub use crate::core::{OperationKind, StageId, StageStatus};
    pub use crate::errors::{
        CycleDetectedError, GraphConstructionError, PipelineError, PipelineFault,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::fault::FaultReport;
    pub use crate::operators::{
        filter, from_iter, from_source, map, merge, try_filter, try_from_source, try_map,
        Operator,
    };
    pub use crate::pipeline::{Pipeline, PipelineRun};
    pub use crate::stages::{Item, Stage};
}
