//! Observability utilities.
//!
//! The engine logs through `tracing` and reports lifecycle events through an
//! [`EventSink`](crate::events::EventSink). This module installs a
//! `tracing-subscriber` formatter for binaries and tests that want to see
//! those logs.

mod subscriber;

pub use subscriber::{init_tracing, LogFormat};
