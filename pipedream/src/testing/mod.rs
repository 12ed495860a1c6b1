//! Testing utilities for pipedream pipelines.
//!
//! This module provides:
//! - Order-insensitive assertions on pipeline output
//! - Fault assertions
//! - Recording and slow probes to splice into stages

mod assertions;
mod probes;

pub use assertions::{assert_fault, assert_same_multiset, sorted};
pub use probes::{slow, Recorder};
