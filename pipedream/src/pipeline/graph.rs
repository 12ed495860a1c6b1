//! Graph wiring.
//!
//! Starting from the terminal descriptors, the builder walks the dependency
//! graph depth-first, instantiates each distinct descriptor exactly once and
//! connects it to its consumers:
//!
//! - every consuming stage gets one input gate, which expects one completion
//!   marker per upstream worker;
//! - every stage gets one broadcaster, registered with the input gate of
//!   each consumer (and with the collection gate if it is a terminal).
//!
//! A descriptor listed twice as a dependency of the same consumer is
//! registered twice, so the consumer sees its stream twice and waits for
//! twice as many markers.

use super::worker::WorkerTracker;
use crate::channel::{GateHandle, MAX_CAPACITY};
use crate::context::RunContext;
use crate::core::{OperationKind, StageId};
use crate::errors::{CycleDetectedError, GraphConstructionError, PipelineError};
use crate::stages::erased::OutputSlot;
use crate::stages::StageNode;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

/// A node reachable through upstream edges.
pub(crate) trait GraphNode: Clone {
    fn node_id(&self) -> StageId;
    fn node_name(&self) -> &str;
    fn upstream(&self) -> Vec<Self>;
}

impl GraphNode for Arc<StageNode> {
    fn node_id(&self) -> StageId {
        self.id
    }

    fn node_name(&self) -> &str {
        &self.name
    }

    fn upstream(&self) -> Vec<Self> {
        self.dependencies.clone()
    }
}

/// Orders every node reachable from `roots` so that each node comes after
/// all of its upstream nodes. Each node appears once.
pub(crate) fn topological_order<N: GraphNode>(roots: &[N]) -> Result<Vec<N>, CycleDetectedError> {
    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();
    let mut order = Vec::new();

    for root in roots {
        visit(root, &mut visited, &mut rec_stack, &mut path, &mut order)?;
    }

    Ok(order)
}

fn visit<N: GraphNode>(
    node: &N,
    visited: &mut HashSet<StageId>,
    rec_stack: &mut HashSet<StageId>,
    path: &mut Vec<(StageId, String)>,
    order: &mut Vec<N>,
) -> Result<(), CycleDetectedError> {
    let id = node.node_id();
    if visited.contains(&id) {
        return Ok(());
    }
    if rec_stack.contains(&id) {
        let cycle_start = path.iter().position(|(p, _)| *p == id).unwrap_or(0);
        let mut cycle: Vec<String> = path[cycle_start..].iter().map(|(_, name)| name.clone()).collect();
        cycle.push(node.node_name().to_string());
        return Err(CycleDetectedError::new(cycle));
    }

    rec_stack.insert(id);
    path.push((id, node.node_name().to_string()));

    for dep in node.upstream() {
        visit(&dep, visited, rec_stack, path, order)?;
    }

    path.pop();
    rec_stack.remove(&id);
    visited.insert(id);
    order.push(node.clone());
    Ok(())
}

fn validate(node: &StageNode) -> Result<(), GraphConstructionError> {
    if node.workers == 0 {
        return Err(GraphConstructionError::no_workers(&node.name));
    }
    if node.capacity > MAX_CAPACITY {
        return Err(GraphConstructionError::capacity_too_large(&node.name, node.capacity));
    }
    match (node.kind(), node.dependencies.is_empty()) {
        (OperationKind::Source, false) => Err(GraphConstructionError::new(
            "GRAPH-006-SOURCE_WITH_INPUT",
            format!("Source stage '{}' cannot have upstream stages", node.name),
        )
        .with_stages(vec![node.name.clone()])),
        (kind, true) if kind.consumes_input() => Err(GraphConstructionError::no_upstream(&node.name)),
        _ => Ok(()),
    }
}

/// The wired, not yet running, instance of a stage graph.
pub(crate) struct StageGraph {
    nodes: Vec<Arc<StageNode>>,
    inputs: HashMap<StageId, GateHandle>,
    outputs: HashMap<StageId, OutputSlot>,
}

impl StageGraph {
    /// Wires every stage reachable from `terminals`; the terminals feed
    /// `collector`.
    pub(crate) fn build(
        terminals: &[Arc<StageNode>],
        collector: &GateHandle,
        ctx: &Arc<RunContext>,
    ) -> Result<Self, PipelineError> {
        if terminals.is_empty() {
            return Err(GraphConstructionError::empty().into());
        }

        let nodes = topological_order(terminals)?;
        for node in &nodes {
            validate(node)?;
        }

        let mut inputs = HashMap::new();
        let mut outputs: HashMap<StageId, OutputSlot> = HashMap::new();

        for node in nodes.iter().filter(|n| !n.dependencies.is_empty()) {
            let required: usize = node.dependencies.iter().map(|dep| dep.workers).sum();
            let gate = node
                .runtime
                .new_input_gate(&node.name, node.capacity, required, ctx)
                .ok_or_else(|| GraphConstructionError::no_upstream(&node.name))?;

            for dep in &node.dependencies {
                let slot = outputs.entry(dep.id).or_insert_with(|| dep.runtime.new_output());
                if !dep.runtime.attach(slot, &gate) {
                    return Err(GraphConstructionError::type_mismatch(&dep.name, &node.name).into());
                }
            }

            debug!(
                stage = %node.name,
                required_producers = required,
                capacity = node.capacity,
                "Wired input gate"
            );
            inputs.insert(node.id, gate);
        }

        for terminal in terminals {
            let slot = outputs
                .entry(terminal.id)
                .or_insert_with(|| terminal.runtime.new_output());
            if !terminal.runtime.attach(slot, collector) {
                return Err(GraphConstructionError::type_mismatch(&terminal.name, "output").into());
            }
        }

        Ok(Self {
            nodes,
            inputs,
            outputs,
        })
    }

    /// Number of distinct stages.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Total number of workers across all stages.
    pub(crate) fn total_workers(&self) -> usize {
        self.nodes.iter().map(|node| node.workers).sum()
    }

    /// Returns the input gate of a stage, if the stage has one in this graph.
    pub(crate) fn input_gate(&self, id: StageId) -> Option<&GateHandle> {
        self.inputs.get(&id)
    }

    /// Returns every input gate.
    pub(crate) fn gates(&self) -> impl Iterator<Item = &GateHandle> {
        self.inputs.values()
    }

    /// Spawns the workers of every stage, upstream stages first.
    pub(crate) fn spawn_workers(
        &self,
        ctx: &Arc<RunContext>,
    ) -> Result<(Vec<JoinHandle<()>>, HashMap<StageId, Arc<WorkerTracker>>), PipelineError> {
        let mut handles = Vec::with_capacity(self.total_workers());
        let mut trackers = HashMap::with_capacity(self.nodes.len());

        for node in &self.nodes {
            let output = self
                .outputs
                .get(&node.id)
                .ok_or_else(|| GraphConstructionError::type_mismatch(&node.name, "output"))?;
            let tracker = Arc::new(WorkerTracker::new(node.workers));

            handles.extend(node.runtime.spawn_workers(
                node,
                self.inputs.get(&node.id),
                output,
                &tracker,
                ctx,
            )?);
            trackers.insert(node.id, tracker);
        }

        Ok((handles, trackers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FanInGate;
    use crate::config::PipelineConfig;
    use crate::events::NoOpEventSink;
    use crate::operators::{from_iter, map, merge};
    use crate::stages::Stage;
    use pretty_assertions::assert_eq;
    use std::rc::Rc;

    #[derive(Clone)]
    struct TestNode {
        id: u64,
        edges: Rc<HashMap<u64, Vec<u64>>>,
    }

    impl GraphNode for TestNode {
        fn node_id(&self) -> StageId {
            StageId(self.id)
        }

        fn node_name(&self) -> &str {
            match self.id {
                1 => "a",
                2 => "b",
                3 => "c",
                _ => "d",
            }
        }

        fn upstream(&self) -> Vec<Self> {
            self.edges
                .get(&self.id)
                .into_iter()
                .flatten()
                .map(|&id| TestNode {
                    id,
                    edges: Rc::clone(&self.edges),
                })
                .collect()
        }
    }

    fn node(id: u64, edges: &[(u64, &[u64])]) -> TestNode {
        TestNode {
            id,
            edges: Rc::new(edges.iter().map(|(k, v)| (*k, v.to_vec())).collect()),
        }
    }

    fn ctx() -> Arc<RunContext> {
        Arc::new(RunContext::new(PipelineConfig::default(), Arc::new(NoOpEventSink)))
    }

    fn collector<T: Send + 'static>(required: usize, ctx: &Arc<RunContext>) -> GateHandle {
        GateHandle::new(Arc::new(FanInGate::<T>::new("output", 0, required, ctx.clone())))
    }

    fn build<T: Send + 'static>(terminals: &[Stage<T>]) -> Result<StageGraph, PipelineError> {
        let ctx = ctx();
        let nodes: Vec<_> = terminals.iter().map(|s| s.node().clone()).collect();
        StageGraph::build(&nodes, &collector::<T>(1, &ctx), &ctx)
    }

    #[test]
    fn test_order_puts_upstream_first() {
        // d depends on b and c, both depend on a
        let d = node(4, &[(4, &[2, 3]), (2, &[1]), (3, &[1])]);
        let order: Vec<u64> = topological_order(&[d]).unwrap().iter().map(|n| n.id).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_cycle_is_reported_with_path() {
        let a = node(1, &[(1, &[2]), (2, &[3]), (3, &[1])]);
        let err = topological_order(&[a]).err().unwrap();
        assert_eq!(err.cycle_path, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_shared_upstream_is_wired_once() {
        let source = from_iter(vec![1, 2, 3]);
        let left = source.map(|x| x + 1);
        let right = source.map(|x| x * 2);
        let joined = merge(&[left, right]);

        let graph = build(&[joined.clone()]).unwrap();
        assert_eq!(graph.len(), 4);
        assert_eq!(graph.total_workers(), 4);
        assert!(graph.input_gate(source.id()).is_none());

        let merge_gate = graph.input_gate(joined.id()).unwrap();
        let typed = merge_gate.downcast::<i32>().unwrap();
        assert_eq!(typed.required_producers(), 2);
    }

    #[test]
    fn test_required_producers_counts_upstream_workers() {
        let source = from_iter(vec![1]).with_workers(3);
        let mapped = source.pipe(&map(|x: i32| x).workers(2));

        let graph = build(&[mapped.clone()]).unwrap();
        let gate = graph.input_gate(mapped.id()).unwrap().downcast::<i32>().unwrap();
        assert_eq!(gate.required_producers(), 3);
    }

    #[test]
    fn test_duplicate_dependency_doubles_required_producers() {
        let source = from_iter(vec![1]).with_workers(2);
        let merged = merge(&[source.clone(), source]);

        let graph = build(&[merged.clone()]).unwrap();
        let gate = graph.input_gate(merged.id()).unwrap().downcast::<i32>().unwrap();
        assert_eq!(gate.required_producers(), 4);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let source = from_iter(vec![1]).with_workers(0).named("idle");
        let err = build(&[source]).err().unwrap();
        match err {
            PipelineError::Construction(e) => {
                assert_eq!(e.code, "GRAPH-003-NO_WORKERS");
                assert_eq!(e.stages, vec!["idle"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_oversized_capacity_rejected() {
        let stage = from_iter(vec![1, 2])
            .map(|x| x)
            .with_capacity(usize::MAX)
            .named("greedy");
        let err = build(&[stage]).err().unwrap();
        match err {
            PipelineError::Construction(e) => {
                assert_eq!(e.code, "GRAPH-007-CAPACITY");
                assert_eq!(e.stages, vec!["greedy"]);
            }
            other => panic!("unexpected error: {other}"),
        }

        let largest = from_iter(vec![1]).map(|x| x).with_capacity(MAX_CAPACITY);
        assert!(build(&[largest]).is_ok());
    }

    #[test]
    fn test_empty_merge_rejected() {
        let err = build(&[merge::<i32>(&[])]).err().unwrap();
        assert!(matches!(err, PipelineError::Construction(ref e) if e.code == "GRAPH-002-NO_UPSTREAM"));
    }

    #[test]
    fn test_no_terminals_rejected() {
        let err = build::<i32>(&[]).err().unwrap();
        assert!(matches!(err, PipelineError::Construction(ref e) if e.code == "GRAPH-005-EMPTY"));
    }

    #[test]
    fn test_collector_type_is_checked() {
        let ctx = ctx();
        let source = from_iter(vec![1_i32]);
        let wrong = collector::<String>(1, &ctx);

        let err = StageGraph::build(&[source.node().clone()], &wrong, &ctx).err().unwrap();
        assert!(matches!(err, PipelineError::Construction(ref e) if e.code == "GRAPH-004-TYPE_MISMATCH"));
    }
}
