//! Stage descriptors.
//!
//! A [`Stage`] is an immutable description of one processing step: its
//! operation, its worker count, its input buffer capacity and its upstream
//! stages. Descriptors are cheap to clone and share; building a descriptor
//! never starts any work. Work starts when a [`Pipeline`] is run from one or
//! more terminal descriptors.
//!
//! Descriptors only reference their upstream stages, so the graph reachable
//! from any descriptor is always acyclic.

pub(crate) mod erased;
pub(crate) mod operation;

use crate::core::{OperationKind, StageId};
use crate::errors::PipelineError;
use crate::operators::{self, Operator};
use crate::pipeline::{Pipeline, PipelineRun};
use erased::ErasedStage;
use std::fmt;
use std::marker::PhantomData;
use std::ops::BitOr;
use std::sync::Arc;

/// Values that can flow between stages.
///
/// Items are cloned when a stage fans out to several consumers and moved
/// across worker threads.
pub trait Item: Clone + Send + 'static {}

impl<T: Clone + Send + 'static> Item for T {}

/// Per-stage settings chosen when a descriptor is built.
#[derive(Debug, Clone)]
pub(crate) struct StageOptions {
    pub(crate) workers: usize,
    pub(crate) capacity: usize,
    pub(crate) name: Option<String>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            capacity: 0,
            name: None,
        }
    }
}

/// The untyped body of a descriptor.
pub(crate) struct StageNode {
    pub(crate) id: StageId,
    pub(crate) name: String,
    custom_name: bool,
    pub(crate) workers: usize,
    pub(crate) capacity: usize,
    pub(crate) dependencies: Vec<Arc<StageNode>>,
    pub(crate) runtime: Arc<dyn ErasedStage>,
}

impl StageNode {
    pub(crate) fn new(
        runtime: Arc<dyn ErasedStage>,
        dependencies: Vec<Arc<StageNode>>,
        options: StageOptions,
    ) -> Self {
        let id = StageId::next();
        let custom_name = options.name.is_some();
        let name = options
            .name
            .unwrap_or_else(|| format!("{}-{}", runtime.kind(), id));

        Self {
            id,
            name,
            custom_name,
            workers: options.workers,
            capacity: options.capacity,
            dependencies,
            runtime,
        }
    }

    pub(crate) fn kind(&self) -> OperationKind {
        self.runtime.kind()
    }

    /// Builds a new descriptor with the same operation and upstream stages.
    fn respecified(&self, update: impl FnOnce(&mut StageOptions)) -> Self {
        let mut options = StageOptions {
            workers: self.workers,
            capacity: self.capacity,
            name: self.custom_name.then(|| self.name.clone()),
        };
        update(&mut options);
        Self::new(Arc::clone(&self.runtime), self.dependencies.clone(), options)
    }
}

/// A descriptor of a stage producing items of type `T`.
///
/// Operations are applied with [`Stage::pipe`], the `|` operator, or the
/// [`map`](Stage::map) and [`filter`](Stage::filter) shortcuts. Iterating a
/// descriptor runs a pipeline that ends at it.
///
/// ```no_run
/// use pipedream::prelude::*;
///
/// let evens = from_iter(0..10) | filter(|x: &i32| x % 2 == 0).workers(2);
/// let doubled = evens.map(|x| x * 2);
/// let mut items = doubled.collect().unwrap();
/// items.sort();
/// assert_eq!(items, vec![0, 4, 8, 12, 16]);
/// ```
pub struct Stage<T> {
    node: Arc<StageNode>,
    _item: PhantomData<fn() -> T>,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            _item: PhantomData,
        }
    }
}

impl<T> Stage<T> {
    pub(crate) fn from_node(node: StageNode) -> Self {
        Self {
            node: Arc::new(node),
            _item: PhantomData,
        }
    }

    pub(crate) fn node(&self) -> &Arc<StageNode> {
        &self.node
    }

    /// Returns the descriptor's identity.
    #[must_use]
    pub fn id(&self) -> StageId {
        self.node.id
    }

    /// Returns the stage name, `{kind}-{id}` unless one was given.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Returns the operation kind.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        self.node.kind()
    }

    /// Returns the number of workers the stage runs with.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.node.workers
    }

    /// Returns the input buffer capacity; 0 means unbounded.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.node.capacity
    }

    /// Returns the ids of the upstream stages, in order, with repeats.
    #[must_use]
    pub fn upstream(&self) -> Vec<StageId> {
        self.node.dependencies.iter().map(|dep| dep.id).collect()
    }
}

impl<T: Item> Stage<T> {
    /// Returns a new descriptor running `workers` workers.
    #[must_use]
    pub fn with_workers(&self, workers: usize) -> Self {
        Self::from_node(self.node.respecified(|o| o.workers = workers))
    }

    /// Returns a new descriptor with the given input buffer capacity.
    #[must_use]
    pub fn with_capacity(&self, capacity: usize) -> Self {
        Self::from_node(self.node.respecified(|o| o.capacity = capacity))
    }

    /// Returns a new descriptor with a custom name.
    #[must_use]
    pub fn named(&self, name: impl Into<String>) -> Self {
        let name = name.into();
        Self::from_node(self.node.respecified(|o| o.name = Some(name)))
    }

    /// Applies a partially applied operator to this stage.
    #[must_use]
    pub fn pipe<U: Item>(&self, operator: &Operator<T, U>) -> Stage<U> {
        operator.apply(self)
    }

    /// Applies `f` to every item, with one worker and an unbounded buffer.
    #[must_use]
    pub fn map<U, F>(&self, f: F) -> Stage<U>
    where
        U: Item,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        operators::map(f).apply(self)
    }

    /// Keeps the items matching `predicate`, with one worker and an
    /// unbounded buffer.
    #[must_use]
    pub fn filter<F>(&self, predicate: F) -> Stage<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        operators::filter(predicate).apply(self)
    }

    /// Starts a pipeline ending at this stage and returns its item stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph cannot be wired or a worker cannot be
    /// spawned. Faults raised while running are yielded by the iterator.
    #[allow(clippy::iter_not_returning_iterator)]
    pub fn iter(&self) -> Result<PipelineRun<T>, PipelineError> {
        Pipeline::new(self).run()
    }

    /// Runs a pipeline ending at this stage and collects every item.
    ///
    /// # Errors
    ///
    /// Returns the first construction error or worker fault.
    pub fn collect(&self) -> Result<Vec<T>, PipelineError> {
        Pipeline::new(self).collect()
    }
}

impl<T: Item, U: Item> BitOr<Operator<T, U>> for Stage<T> {
    type Output = Stage<U>;

    fn bitor(self, operator: Operator<T, U>) -> Stage<U> {
        operator.apply(&self)
    }
}

impl<T: Item, U: Item> BitOr<Operator<T, U>> for &Stage<T> {
    type Output = Stage<U>;

    fn bitor(self, operator: Operator<T, U>) -> Stage<U> {
        operator.apply(self)
    }
}

impl<T: Item, U: Item> BitOr<Operator<T, U>> for Vec<T> {
    type Output = Stage<U>;

    fn bitor(self, operator: Operator<T, U>) -> Stage<U> {
        operator.apply(&Stage::from(self))
    }
}

/// A materialized collection becomes a source stage, as with
/// [`from_iter`](operators::from_iter).
impl<T: Item> From<Vec<T>> for Stage<T> {
    fn from(items: Vec<T>) -> Self {
        operators::from_iter(items)
    }
}

impl<T: Item, const N: usize> From<[T; N]> for Stage<T> {
    fn from(items: [T; N]) -> Self {
        operators::from_iter(items)
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dependencies: Vec<&str> = self
            .node
            .dependencies
            .iter()
            .map(|dep| dep.name.as_str())
            .collect();

        f.debug_struct("Stage")
            .field("name", &self.node.name)
            .field("kind", &self.node.kind())
            .field("workers", &self.node.workers)
            .field("capacity", &self.node.capacity)
            .field("dependencies", &dependencies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::{from_iter, map, merge};
    use crate::testing::sorted;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_collections_convert_to_source_stages() {
        let stage = Stage::from(vec![1, 2, 3]);
        assert_eq!(stage.kind(), OperationKind::Source);
        assert_eq!(sorted(stage.collect().unwrap()), vec![1, 2, 3]);

        let piped = vec![1, 2, 3] | map(|x: i32| x * 10);
        assert_eq!(sorted(piped.collect().unwrap()), vec![10, 20, 30]);

        let from_array: Stage<&str> = ["a", "b"].into();
        assert_eq!(sorted(from_array.collect().unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_default_name_uses_kind_and_id() {
        let source = from_iter(vec![1, 2, 3]);
        assert_eq!(source.name(), format!("source-{}", source.id()));
        assert_eq!(source.kind(), OperationKind::Source);
        assert_eq!(source.workers(), 1);
        assert_eq!(source.capacity(), 0);
    }

    #[test]
    fn test_respecified_descriptor_is_a_new_stage() {
        let source = from_iter(vec![1, 2, 3]);
        let doubled = source.map(|x| x * 2);
        let wide = doubled.with_workers(4).with_capacity(8);

        assert_ne!(wide.id(), doubled.id());
        assert_eq!(wide.workers(), 4);
        assert_eq!(wide.capacity(), 8);
        assert_eq!(wide.upstream(), vec![source.id()]);
        assert_eq!(doubled.workers(), 1);
    }

    #[test]
    fn test_custom_name_survives_respecification() {
        let named = from_iter(vec![1]).named("numbers").with_workers(2);
        assert_eq!(named.name(), "numbers");
    }

    #[test]
    fn test_pipe_and_bitor_build_the_same_shape() {
        let source = from_iter(vec![1, 2, 3]);
        let add_one = map(|x: i32| x + 1).workers(2);

        let piped = source.pipe(&add_one);
        let barred = &source | add_one;

        assert_eq!(piped.kind(), barred.kind());
        assert_eq!(piped.workers(), 2);
        assert_eq!(barred.workers(), 2);
        assert_eq!(piped.upstream(), barred.upstream());
        assert_ne!(piped.id(), barred.id());
    }

    #[test]
    fn test_merge_keeps_repeated_dependencies() {
        let source = from_iter(vec![1]);
        let merged = merge(&[source.clone(), source.clone()]);
        assert_eq!(merged.upstream(), vec![source.id(), source.id()]);
    }

    #[test]
    fn test_debug_lists_dependencies() {
        let source = from_iter(vec![1]).named("numbers");
        let mapped = source.map(|x| x + 1).named("inc");

        let repr = format!("{mapped:?}");
        assert!(repr.contains("name: \"inc\""));
        assert!(repr.contains("kind: Map"));
        assert!(repr.contains("dependencies: [\"numbers\"]"));
    }
}
