//! Channels between stages.
//!
//! - [`FanInGate`]: bounded channel + count of unfinished producers
//! - [`Broadcaster`]: replicates a stage's output to every consumer gate
//! - [`GateMetrics`]: backpressure counters per gate

mod broadcast;
mod gate;
mod metrics;

pub use broadcast::Broadcaster;
pub use gate::{FanInGate, GateRead, Halted, MAX_CAPACITY};
pub(crate) use gate::{GateControl, GateHandle};
pub use metrics::{GateMetrics, GateMetricsSnapshot};
