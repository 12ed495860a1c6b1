//! Worker threads.
//!
//! Every worker runs on its own OS thread. Its body is wrapped in
//! [`supervise`], which catches both returned failures and panics, publishes
//! the first fault into the run's fault state and never lets anything unwind
//! out of the thread.
//!
//! A worker that completes normally closes its output broadcaster, sending
//! one completion marker to every downstream gate. A worker that faults or
//! halts does not: the driver detects the fault through the shared flag
//! instead of waiting for markers that will never arrive.

use crate::channel::{Broadcaster, FanInGate, GateRead};
use crate::context::RunContext;
use crate::core::{OperationKind, StageStatus};
use crate::errors::PipelineError;
use crate::fault::{Failure, FaultReport};
use crate::stages::erased::SourceFn;
use crate::stages::operation::StepError;
use crate::stages::Item;
use serde_json::json;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

/// Counts the live workers of one stage.
#[derive(Debug)]
pub(crate) struct WorkerTracker {
    workers: usize,
    active: AtomicUsize,
}

impl WorkerTracker {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            workers,
            active: AtomicUsize::new(workers),
        }
    }

    fn worker_finished(&self) {
        let _ = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn status(&self) -> StageStatus {
        StageStatus {
            workers: self.workers,
            active_workers: self.active.load(Ordering::Acquire),
        }
    }
}

/// Everything one worker needs besides its input gate.
pub(crate) struct WorkerWiring<O> {
    pub(crate) stage: String,
    pub(crate) kind: OperationKind,
    pub(crate) workers: usize,
    pub(crate) index: usize,
    pub(crate) output: Broadcaster<O>,
    pub(crate) tracker: Arc<WorkerTracker>,
    pub(crate) ctx: Arc<RunContext>,
}

impl<O> WorkerWiring<O> {
    fn event_data(&self) -> serde_json::Value {
        json!({
            "stage": self.stage,
            "kind": self.kind,
            "worker": self.index,
            "workers": self.workers,
        })
    }
}

/// Spawns a worker thread named `{prefix}-{stage}-{index}`.
pub(crate) fn spawn<O, F>(wiring: WorkerWiring<O>, body: F) -> Result<JoinHandle<()>, PipelineError>
where
    O: Item,
    F: FnOnce(&WorkerWiring<O>) -> Result<(), StepError> + Send + 'static,
{
    let name = format!(
        "{}-{}-{}",
        wiring.ctx.config().thread_name_prefix,
        wiring.stage,
        wiring.index
    );

    thread::Builder::new()
        .name(name)
        .spawn(move || supervise(&wiring, body))
        .map_err(PipelineError::Spawn)
}

fn supervise<O, F>(wiring: &WorkerWiring<O>, body: F)
where
    F: FnOnce(&WorkerWiring<O>) -> Result<(), StepError>,
{
    let span = tracing::debug_span!(
        "worker",
        run_id = %wiring.ctx.run_id(),
        stage = %wiring.stage,
        worker = wiring.index,
    );
    let _entered = span.enter();

    debug!("Worker started");
    wiring.ctx.emit("worker.started", wiring.event_data());

    match panic::catch_unwind(AssertUnwindSafe(|| body(wiring))) {
        Ok(Ok(())) => {
            debug!("Worker completed");
            wiring.ctx.emit("worker.completed", wiring.event_data());
        }
        Ok(Err(StepError::Halted)) => debug!("Worker halted"),
        Ok(Err(StepError::Failed(failure))) => report_fault(wiring, failure),
        Err(payload) => report_fault(wiring, Failure::from_panic(payload.as_ref())),
    }

    wiring.tracker.worker_finished();
}

fn report_fault<O>(wiring: &WorkerWiring<O>, failure: Failure) {
    let report = FaultReport::new(&wiring.stage, wiring.index, wiring.workers, failure);
    error!(kind = %report.kind, "Worker faulted: {}", report.message);

    let mut data = report.to_value();
    let published = wiring.ctx.fault().publish(report);
    if !published {
        debug!("Run already faulted; report dropped");
    }
    data["published"] = json!(published);
    wiring.ctx.emit("worker.faulted", data);
}

/// Body of a source worker: drains the producer's iterator into the output.
pub(crate) fn produce<T: Item>(wiring: &WorkerWiring<T>, producer: &SourceFn<T>) -> Result<(), StepError> {
    for item in producer()? {
        wiring.output.put(item)?;
    }
    wiring.output.close()?;
    Ok(())
}

/// Body of a consuming worker: polls `input` until it is exhausted, applying
/// `step` to every item.
pub(crate) fn consume<I, O, F>(wiring: &WorkerWiring<O>, input: &FanInGate<I>, mut step: F) -> Result<(), StepError>
where
    I: Item,
    O: Item,
    F: FnMut(I, &Broadcaster<O>) -> Result<(), StepError>,
{
    let poll_interval = wiring.ctx.config().poll_interval();
    loop {
        if wiring.ctx.should_halt() {
            return Err(StepError::Halted);
        }
        match input.try_get() {
            GateRead::Item(item) => step(item, &wiring.output)?,
            GateRead::Continue => thread::sleep(poll_interval),
            GateRead::Done => break,
        }
    }
    wiring.output.close()?;
    Ok(())
}
