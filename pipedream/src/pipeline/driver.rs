//! The pipeline driver.
//!
//! [`Pipeline::run`] wires the graph, spawns every worker and hands back a
//! [`PipelineRun`], which is the caller's view of the running pipeline. The
//! run yields items from the collection gate as they arrive and surfaces the
//! first worker fault, once. It can be consumed as a blocking iterator or as
//! an async stream.
//!
//! Dropping a run before it finishes abandons it: the run is cancelled,
//! every gate is force-closed and the workers exit at their next check.
//! Worker threads are not joined in that case.

use super::graph::StageGraph;
use super::worker::WorkerTracker;
use crate::channel::{FanInGate, GateHandle, GateMetricsSnapshot, GateRead};
use crate::config::PipelineConfig;
use crate::context::RunContext;
use crate::core::{StageId, StageStatus};
use crate::errors::{PipelineError, PipelineFault};
use crate::events::{EventSink, NoOpEventSink};
use crate::fault::{self, FaultReport};
use crate::stages::{Item, Stage};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::iter::FusedIterator;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A runnable pipeline: one or more terminal stages plus run settings.
pub struct Pipeline<T> {
    terminals: Vec<Stage<T>>,
    config: PipelineConfig,
    event_sink: Arc<dyn EventSink>,
}

impl<T: Item> Pipeline<T> {
    /// Creates a pipeline ending at `terminal`.
    #[must_use]
    pub fn new(terminal: &Stage<T>) -> Self {
        Self::with_terminals(std::slice::from_ref(terminal))
    }

    /// Creates a pipeline whose output is the union of several terminals.
    #[must_use]
    pub fn with_terminals(terminals: &[Stage<T>]) -> Self {
        Self {
            terminals: terminals.to_vec(),
            config: PipelineConfig::default(),
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Replaces the run configuration.
    #[must_use]
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the capacity of the collection gate; 0 means unbounded.
    #[must_use]
    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.config.output_capacity = capacity;
        self
    }

    /// Sets the sink receiving lifecycle events.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Wires the graph and starts every worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the graph cannot be
    /// wired, or a worker thread cannot be spawned. No worker is left
    /// running when an error is returned.
    pub fn run(self) -> Result<PipelineRun<T>, PipelineError> {
        self.config.validate()?;
        fault::install_panic_hook();

        let ctx = Arc::new(RunContext::new(self.config, self.event_sink));
        let required: usize = self.terminals.iter().map(Stage::workers).sum();
        let output = Arc::new(FanInGate::<T>::new(
            "output",
            ctx.config().output_capacity,
            required,
            Arc::clone(&ctx),
        ));
        let collector = GateHandle::new(Arc::clone(&output));

        let terminals: Vec<_> = self.terminals.iter().map(|stage| Arc::clone(stage.node())).collect();
        let graph = StageGraph::build(&terminals, &collector, &ctx)?;

        let (handles, trackers) = match graph.spawn_workers(&ctx) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(run_id = %ctx.run_id(), "Failed to start pipeline: {}", e);
                ctx.cancel_token().cancel("worker spawn failed");
                graph.gates().for_each(|gate| gate.control().force_close());
                return Err(e);
            }
        };

        info!(
            run_id = %ctx.run_id(),
            stages = graph.len(),
            workers = handles.len(),
            "Pipeline started"
        );
        ctx.emit(
            "pipeline.started",
            json!({"stages": graph.len(), "workers": handles.len()}),
        );

        Ok(PipelineRun {
            ctx,
            output,
            collector,
            graph,
            trackers,
            handles,
            finished: false,
            yielded: 0,
            started_at: Instant::now(),
        })
    }

    /// Runs the pipeline to completion and collects every item.
    ///
    /// # Errors
    ///
    /// Returns the first construction error or worker fault.
    pub fn collect(self) -> Result<Vec<T>, PipelineError> {
        self.run()?.collect()
    }

    /// Runs the pipeline to completion without blocking the async runtime
    /// between items.
    ///
    /// # Errors
    ///
    /// Returns the first construction error or worker fault.
    pub async fn collect_async(self) -> Result<Vec<T>, PipelineError> {
        self.run()?.into_stream().try_collect().await
    }
}

/// Outcome of one non-blocking poll of a run.
enum Step<T> {
    Item(T),
    Pending,
    End(Option<PipelineError>),
}

/// A running pipeline.
///
/// Yields `Ok(item)` for every item reaching the terminals, in arrival
/// order. If a worker faults, yields exactly one `Err` carrying the fault and
/// then ends. Items already yielded before the fault was noticed stay
/// yielded.
pub struct PipelineRun<T> {
    ctx: Arc<RunContext>,
    output: Arc<FanInGate<T>>,
    collector: GateHandle,
    graph: StageGraph,
    trackers: HashMap<StageId, Arc<WorkerTracker>>,
    handles: Vec<JoinHandle<()>>,
    finished: bool,
    yielded: u64,
    started_at: Instant,
}

impl<T> PipelineRun<T> {
    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.ctx.run_id()
    }

    /// Returns true once the run has completed, faulted or been abandoned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns the worker status of `stage`, if it is part of this run.
    #[must_use]
    pub fn stage_status<U>(&self, stage: &Stage<U>) -> Option<StageStatus> {
        self.trackers.get(&stage.id()).map(|tracker| tracker.status())
    }

    /// Returns the counters of `stage`'s input gate, if it has one in this
    /// run.
    #[must_use]
    pub fn gate_metrics<U>(&self, stage: &Stage<U>) -> Option<GateMetricsSnapshot> {
        self.graph
            .input_gate(stage.id())
            .map(|gate| gate.control().metrics_snapshot())
    }

    /// Returns the counters of the collection gate.
    #[must_use]
    pub fn output_metrics(&self) -> GateMetricsSnapshot {
        self.collector.control().metrics_snapshot()
    }

    fn halt_workers(&self, reason: &str) {
        self.ctx.cancel_token().cancel(reason);
        for gate in self.graph.gates() {
            gate.control().force_close();
            debug!(run_id = %self.ctx.run_id(), gate = gate.control().label(), "Force-closed gate");
        }
        self.collector.control().force_close();
    }

    fn fail(&mut self) -> PipelineError {
        self.finished = true;
        self.halt_workers("pipeline faulted");

        let report = self.ctx.fault().report().unwrap_or_else(FaultReport::unreported);
        error!(
            run_id = %self.ctx.run_id(),
            stage = %report.stage,
            kind = %report.kind,
            "Pipeline faulted: {}",
            report.message
        );
        self.ctx.emit("pipeline.faulted", report.to_value());

        PipelineFault::new(report).into()
    }

    fn complete(&mut self) {
        self.finished = true;
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!(run_id = %self.ctx.run_id(), "Worker thread panicked outside its supervisor");
            }
        }

        let duration_ms = self.started_at.elapsed().as_secs_f64() * 1000.0;
        info!(
            run_id = %self.ctx.run_id(),
            items = self.yielded,
            duration_ms,
            "Pipeline completed"
        );
        self.ctx.emit(
            "pipeline.completed",
            json!({"items": self.yielded, "duration_ms": duration_ms}),
        );
    }
}

impl<T: Item> PipelineRun<T> {
    fn poll_step(&mut self) -> Step<T> {
        if self.finished {
            return Step::End(None);
        }
        if self.ctx.fault().is_faulted() {
            return Step::End(Some(self.fail()));
        }

        match self.output.try_get() {
            GateRead::Item(item) => {
                self.yielded += 1;
                Step::Item(item)
            }
            GateRead::Continue => Step::Pending,
            GateRead::Done if self.ctx.fault().is_faulted() => Step::End(Some(self.fail())),
            GateRead::Done => {
                self.complete();
                Step::End(None)
            }
        }
    }

    /// Converts the run into an async stream.
    ///
    /// Waiting for items sleeps on the tokio timer instead of blocking the
    /// thread. Dropping the stream early abandons the run.
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, Result<T, PipelineError>> {
        stream::unfold(self, |mut run| async move {
            let poll_interval = run.ctx.config().poll_interval();
            loop {
                match run.poll_step() {
                    Step::Item(item) => return Some((Ok(item), run)),
                    Step::Pending => tokio::time::sleep(poll_interval).await,
                    Step::End(Some(err)) => return Some((Err(err), run)),
                    Step::End(None) => return None,
                }
            }
        })
        .fuse()
        .boxed()
    }
}

impl<T: Item> Iterator for PipelineRun<T> {
    type Item = Result<T, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let poll_interval = self.ctx.config().poll_interval();
        loop {
            match self.poll_step() {
                Step::Item(item) => return Some(Ok(item)),
                Step::Pending => thread::sleep(poll_interval),
                Step::End(Some(err)) => return Some(Err(err)),
                Step::End(None) => return None,
            }
        }
    }
}

impl<T: Item> FusedIterator for PipelineRun<T> {}

impl<T> Drop for PipelineRun<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        warn!(
            run_id = %self.ctx.run_id(),
            items = self.yielded,
            "Pipeline abandoned before completion; halting workers"
        );
        self.halt_workers("pipeline abandoned");
        self.ctx.emit("pipeline.abandoned", json!({"items": self.yielded}));
        debug!(
            run_id = %self.ctx.run_id(),
            workers = self.handles.len(),
            "Detached worker threads"
        );
    }
}

impl<T> std::fmt::Debug for PipelineRun<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRun")
            .field("run_id", &self.ctx.run_id())
            .field("stages", &self.graph.len())
            .field("finished", &self.finished)
            .field("yielded", &self.yielded)
            .finish_non_exhaustive()
    }
}
