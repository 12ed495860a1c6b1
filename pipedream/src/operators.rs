//! Operator builders.
//!
//! Sources and merges produce descriptors directly. [`map`] and [`filter`]
//! return an [`Operator`]: an operation with its worker count and capacity
//! fixed but no upstream yet. Apply it with [`Operator::apply`],
//! [`Stage::pipe`] or the `|` operator. An operator can be applied to any
//! number of stages; each application is a distinct stage.
//!
//! The `try_` variants accept fallible closures. An `Err` is treated exactly
//! like a panic: the worker faults and the run fails with the error's type
//! name and message.

use crate::core::OperationKind;
use crate::fault::{BoxError, Failure};
use crate::stages::erased::{ErasedStage, SourceFn, SourceStage, Transform};
use crate::stages::operation::{FilterOp, MapOp, MergeOp};
use crate::stages::{Item, Stage, StageNode, StageOptions};
use std::fmt;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;

/// An operation waiting to be applied to an upstream stage.
pub struct Operator<I, O> {
    runtime: Arc<dyn ErasedStage>,
    options: StageOptions,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Operator<I, O> {
    fn clone(&self) -> Self {
        Self {
            runtime: Arc::clone(&self.runtime),
            options: self.options.clone(),
            _types: PhantomData,
        }
    }
}

impl<I: Item, O: Item> Operator<I, O> {
    fn new(runtime: Arc<dyn ErasedStage>) -> Self {
        Self {
            runtime,
            options: StageOptions::default(),
            _types: PhantomData,
        }
    }

    /// Sets the number of workers for stages built from this operator.
    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.options.workers = workers;
        self
    }

    /// Sets the input buffer capacity; 0 means unbounded.
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.options.capacity = capacity;
        self
    }

    /// Names stages built from this operator.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.options.name = Some(name.into());
        self
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.runtime.kind()
    }

    /// Builds a stage applying this operation to `upstream`'s items.
    #[must_use]
    pub fn apply(&self, upstream: &Stage<I>) -> Stage<O> {
        Stage::from_node(StageNode::new(
            Arc::clone(&self.runtime),
            vec![Arc::clone(upstream.node())],
            self.options.clone(),
        ))
    }
}

impl<I, O> fmt::Debug for Operator<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("kind", &self.runtime.kind())
            .field("workers", &self.options.workers)
            .field("capacity", &self.options.capacity)
            .finish()
    }
}

fn source_stage<T: Item>(producer: Arc<SourceFn<T>>) -> Stage<T> {
    let runtime: Arc<dyn ErasedStage> = Arc::new(SourceStage::new(producer));
    Stage::from_node(StageNode::new(runtime, Vec::new(), StageOptions::default()))
}

/// Builds a source stage from a producer.
///
/// The producer is called once per worker, inside the worker thread, and
/// every item of the returned iterable is emitted. With more than one
/// worker, each worker emits its own full copy of the producer's items.
#[must_use]
pub fn from_source<T, It, F>(producer: F) -> Stage<T>
where
    T: Item,
    It: IntoIterator<Item = T>,
    It::IntoIter: 'static,
    F: Fn() -> It + Send + Sync + 'static,
{
    source_stage(Arc::new(move || -> Result<Box<dyn Iterator<Item = T>>, Failure> {
        Ok(Box::new(producer().into_iter()))
    }))
}

/// Builds a source stage from a fallible producer.
///
/// An `Err` returned by the producer faults the source worker.
#[must_use]
pub fn try_from_source<T, It, E, F>(producer: F) -> Stage<T>
where
    T: Item,
    It: IntoIterator<Item = T>,
    It::IntoIter: 'static,
    E: Into<BoxError> + 'static,
    F: Fn() -> Result<It, E> + Send + Sync + 'static,
{
    source_stage(Arc::new(move || -> Result<Box<dyn Iterator<Item = T>>, Failure> {
        match producer() {
            Ok(items) => Ok(Box::new(items.into_iter())),
            Err(e) => Err(Failure::from_error(e)),
        }
    }))
}

/// Builds a source stage emitting a fixed collection of items.
///
/// The items are collected up front; every worker emits a clone of them.
#[must_use]
pub fn from_iter<T, It>(items: It) -> Stage<T>
where
    T: Item,
    It: IntoIterator<Item = T>,
{
    let items: Mutex<Vec<T>> = Mutex::new(items.into_iter().collect());
    from_source(move || items.lock().clone())
}

/// Partially applies a map: every input item `x` becomes `f(x)`.
#[must_use]
pub fn map<I, O, F>(f: F) -> Operator<I, O>
where
    I: Item,
    O: Item,
    F: Fn(I) -> O + Send + Sync + 'static,
{
    Operator::new(Arc::new(Transform::new(MapOp::new(Arc::new(
        move |item: I| -> Result<O, Failure> { Ok(f(item)) },
    )))))
}

/// Partially applies a fallible map. An `Err` faults the worker.
#[must_use]
pub fn try_map<I, O, E, F>(f: F) -> Operator<I, O>
where
    I: Item,
    O: Item,
    E: Into<BoxError> + 'static,
    F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
{
    Operator::new(Arc::new(Transform::new(MapOp::new(Arc::new(move |item: I| -> Result<O, Failure> {
        f(item).map_err(Failure::from_error)
    })))))
}

/// Partially applies a filter keeping the items for which `predicate` holds.
#[must_use]
pub fn filter<T, F>(predicate: F) -> Operator<T, T>
where
    T: Item,
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    Operator::new(Arc::new(Transform::new(FilterOp::new(Arc::new(move |item: &T| -> Result<bool, Failure> {
        Ok(predicate(item))
    })))))
}

/// Partially applies a fallible filter. An `Err` faults the worker.
#[must_use]
pub fn try_filter<T, E, F>(predicate: F) -> Operator<T, T>
where
    T: Item,
    E: Into<BoxError> + 'static,
    F: Fn(&T) -> Result<bool, E> + Send + Sync + 'static,
{
    Operator::new(Arc::new(Transform::new(FilterOp::new(Arc::new(move |item: &T| -> Result<bool, Failure> {
        predicate(item).map_err(Failure::from_error)
    })))))
}

/// Builds a stage emitting the union of its upstream streams.
///
/// Order across upstreams is not defined. A stage listed twice contributes
/// its stream twice. Merging no stages is rejected when the pipeline is run.
#[must_use]
pub fn merge<T: Item>(stages: &[Stage<T>]) -> Stage<T> {
    let runtime: Arc<dyn ErasedStage> = Arc::new(Transform::new(MergeOp::<T>::new()));
    let dependencies = stages.iter().map(|stage| Arc::clone(stage.node())).collect();
    Stage::from_node(StageNode::new(runtime, dependencies, StageOptions::default()))
}
