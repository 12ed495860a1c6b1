//! Per-item operations applied by consuming workers.

use super::Item;
use crate::channel::{Broadcaster, Halted};
use crate::core::OperationKind;
use crate::fault::Failure;
use std::marker::PhantomData;
use std::sync::Arc;

/// Why a worker stopped before closing its outputs.
#[derive(Debug)]
pub(crate) enum StepError {
    /// The run was cancelled or faulted elsewhere; exit quietly.
    Halted,
    /// User code failed; the worker must report a fault.
    Failed(Failure),
}

impl From<Halted> for StepError {
    fn from(_: Halted) -> Self {
        Self::Halted
    }
}

impl From<Failure> for StepError {
    fn from(failure: Failure) -> Self {
        Self::Failed(failure)
    }
}

/// The work a consuming stage does with one input item.
pub(crate) trait Operation: Send + Sync + 'static {
    type In: Item;
    type Out: Item;

    fn kind(&self) -> OperationKind;

    /// Processes one item, forwarding any result to `out`.
    fn apply(&self, item: Self::In, out: &Broadcaster<Self::Out>) -> Result<(), StepError>;
}

pub(crate) type MapFn<I, O> = dyn Fn(I) -> Result<O, Failure> + Send + Sync;
pub(crate) type PredicateFn<T> = dyn Fn(&T) -> Result<bool, Failure> + Send + Sync;

/// Emits `f(item)` for every item.
pub(crate) struct MapOp<I, O> {
    f: Arc<MapFn<I, O>>,
}

impl<I, O> MapOp<I, O> {
    pub(crate) fn new(f: Arc<MapFn<I, O>>) -> Self {
        Self { f }
    }
}

impl<I: Item, O: Item> Operation for MapOp<I, O> {
    type In = I;
    type Out = O;

    fn kind(&self) -> OperationKind {
        OperationKind::Map
    }

    fn apply(&self, item: I, out: &Broadcaster<O>) -> Result<(), StepError> {
        let mapped = (self.f)(item)?;
        out.put(mapped)?;
        Ok(())
    }
}

/// Emits the items for which the predicate holds.
pub(crate) struct FilterOp<T> {
    predicate: Arc<PredicateFn<T>>,
}

impl<T> FilterOp<T> {
    pub(crate) fn new(predicate: Arc<PredicateFn<T>>) -> Self {
        Self { predicate }
    }
}

impl<T: Item> Operation for FilterOp<T> {
    type In = T;
    type Out = T;

    fn kind(&self) -> OperationKind {
        OperationKind::Filter
    }

    fn apply(&self, item: T, out: &Broadcaster<T>) -> Result<(), StepError> {
        if (self.predicate)(&item)? {
            out.put(item)?;
        }
        Ok(())
    }
}

/// Forwards every item unchanged. Fan-in happens in the input gate.
pub(crate) struct MergeOp<T> {
    _item: PhantomData<fn(T) -> T>,
}

impl<T> MergeOp<T> {
    pub(crate) fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T: Item> Operation for MergeOp<T> {
    type In = T;
    type Out = T;

    fn kind(&self) -> OperationKind {
        OperationKind::Merge
    }

    fn apply(&self, item: T, out: &Broadcaster<T>) -> Result<(), StepError> {
        out.put(item)?;
        Ok(())
    }
}
