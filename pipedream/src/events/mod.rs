//! Lifecycle events for observability.
//!
//! Every run emits events to the sink configured on its
//! [`Pipeline`](crate::pipeline::Pipeline):
//!
//! | event                | emitted by | when                                   |
//! |----------------------|------------|----------------------------------------|
//! | `pipeline.started`   | driver     | all workers spawned                    |
//! | `worker.started`     | worker     | worker thread begins                   |
//! | `worker.completed`   | worker     | worker closed its output normally      |
//! | `worker.faulted`     | worker     | worker captured a fault                |
//! | `pipeline.completed` | driver     | collection gate exhausted, no fault    |
//! | `pipeline.faulted`   | driver     | fault surfaced to the caller           |
//! | `pipeline.abandoned` | driver     | caller dropped the run before the end  |

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

#[cfg(test)]
pub use sink::MockEventSink;
