//! Type-erased stage runtimes.
//!
//! Descriptors are generic over their item type, but a graph mixes stages of
//! many types. Each descriptor therefore carries an [`ErasedStage`] that knows
//! how to allocate its typed input gate, its typed broadcaster and its
//! workers. The graph builder only ever sees `Any` values and asks the
//! runtime to wire them.

use super::operation::Operation;
use super::{Item, StageNode};
use crate::channel::{Broadcaster, FanInGate, GateHandle};
use crate::context::RunContext;
use crate::core::OperationKind;
use crate::errors::{GraphConstructionError, PipelineError};
use crate::fault::Failure;
use crate::pipeline::worker::{self, WorkerTracker, WorkerWiring};
use std::any::Any;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A stage's broadcaster, boxed so the graph can hold stages of any type.
pub(crate) type OutputSlot = Box<dyn Any + Send + Sync>;

/// Produces the iterator a source worker drains.
pub(crate) type SourceFn<T> = dyn Fn() -> Result<Box<dyn Iterator<Item = T>>, Failure> + Send + Sync;

/// The typed half of a stage, seen through a type-erased interface.
pub(crate) trait ErasedStage: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Allocates the stage's input gate, or `None` for stages without input.
    fn new_input_gate(
        &self,
        label: &str,
        capacity: usize,
        required_producers: usize,
        ctx: &Arc<RunContext>,
    ) -> Option<GateHandle>;

    /// Allocates an empty broadcaster for the stage's output.
    fn new_output(&self) -> OutputSlot;

    /// Registers `gate` as a target of `output`.
    ///
    /// Returns false when the gate's item type differs from the stage's
    /// output type.
    fn attach(&self, output: &mut OutputSlot, gate: &GateHandle) -> bool;

    /// Spawns one worker thread per configured worker.
    fn spawn_workers(
        &self,
        node: &StageNode,
        input: Option<&GateHandle>,
        output: &OutputSlot,
        tracker: &Arc<WorkerTracker>,
        ctx: &Arc<RunContext>,
    ) -> Result<Vec<JoinHandle<()>>, PipelineError>;
}

fn new_output_of<T: Item>() -> OutputSlot {
    Box::new(Broadcaster::<T>::new())
}

fn attach_to<T: Item>(output: &mut OutputSlot, gate: &GateHandle) -> bool {
    match ((**output).downcast_mut::<Broadcaster<T>>(), gate.downcast::<T>()) {
        (Some(broadcaster), Some(gate)) => {
            broadcaster.register(gate);
            true
        }
        _ => false,
    }
}

fn output_of<T: Item>(node: &StageNode, output: &OutputSlot) -> Result<Broadcaster<T>, PipelineError> {
    (**output)
        .downcast_ref::<Broadcaster<T>>()
        .cloned()
        .ok_or_else(|| GraphConstructionError::type_mismatch(&node.name, "output").into())
}

fn wiring<O: Item>(
    node: &StageNode,
    index: usize,
    output: &Broadcaster<O>,
    tracker: &Arc<WorkerTracker>,
    ctx: &Arc<RunContext>,
) -> WorkerWiring<O> {
    WorkerWiring {
        stage: node.name.clone(),
        kind: node.runtime.kind(),
        workers: node.workers,
        index,
        output: output.clone(),
        tracker: Arc::clone(tracker),
        ctx: Arc::clone(ctx),
    }
}

/// Runtime of a source stage.
pub(crate) struct SourceStage<T> {
    producer: Arc<SourceFn<T>>,
}

impl<T> SourceStage<T> {
    pub(crate) fn new(producer: Arc<SourceFn<T>>) -> Self {
        Self { producer }
    }
}

impl<T: Item> ErasedStage for SourceStage<T> {
    fn kind(&self) -> OperationKind {
        OperationKind::Source
    }

    fn new_input_gate(
        &self,
        _label: &str,
        _capacity: usize,
        _required_producers: usize,
        _ctx: &Arc<RunContext>,
    ) -> Option<GateHandle> {
        None
    }

    fn new_output(&self) -> OutputSlot {
        new_output_of::<T>()
    }

    fn attach(&self, output: &mut OutputSlot, gate: &GateHandle) -> bool {
        attach_to::<T>(output, gate)
    }

    fn spawn_workers(
        &self,
        node: &StageNode,
        _input: Option<&GateHandle>,
        output: &OutputSlot,
        tracker: &Arc<WorkerTracker>,
        ctx: &Arc<RunContext>,
    ) -> Result<Vec<JoinHandle<()>>, PipelineError> {
        let output = output_of::<T>(node, output)?;
        (0..node.workers)
            .map(|index| {
                let producer = Arc::clone(&self.producer);
                worker::spawn(wiring(node, index, &output, tracker, ctx), move |w| {
                    worker::produce(w, producer.as_ref())
                })
            })
            .collect()
    }
}

/// Runtime of a stage that reads an input gate and applies an [`Operation`].
pub(crate) struct Transform<Op> {
    op: Arc<Op>,
}

impl<Op> Transform<Op> {
    pub(crate) fn new(op: Op) -> Self {
        Self { op: Arc::new(op) }
    }
}

impl<Op: Operation> ErasedStage for Transform<Op> {
    fn kind(&self) -> OperationKind {
        self.op.kind()
    }

    fn new_input_gate(
        &self,
        label: &str,
        capacity: usize,
        required_producers: usize,
        ctx: &Arc<RunContext>,
    ) -> Option<GateHandle> {
        let gate = FanInGate::<Op::In>::new(label, capacity, required_producers, Arc::clone(ctx));
        Some(GateHandle::new(Arc::new(gate)))
    }

    fn new_output(&self) -> OutputSlot {
        new_output_of::<Op::Out>()
    }

    fn attach(&self, output: &mut OutputSlot, gate: &GateHandle) -> bool {
        attach_to::<Op::Out>(output, gate)
    }

    fn spawn_workers(
        &self,
        node: &StageNode,
        input: Option<&GateHandle>,
        output: &OutputSlot,
        tracker: &Arc<WorkerTracker>,
        ctx: &Arc<RunContext>,
    ) -> Result<Vec<JoinHandle<()>>, PipelineError> {
        let input = input
            .and_then(GateHandle::downcast::<Op::In>)
            .ok_or_else(|| GraphConstructionError::no_upstream(&node.name))?;
        let output = output_of::<Op::Out>(node, output)?;

        (0..node.workers)
            .map(|index| {
                let op = Arc::clone(&self.op);
                let input = Arc::clone(&input);
                worker::spawn(wiring(node, index, &output, tracker, ctx), move |w| {
                    worker::consume(w, &*input, |item, out| op.apply(item, out))
                })
            })
            .collect()
    }
}
