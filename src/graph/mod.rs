//! Pipeline graph construction.
//!
//! The graph is built through an explicit API: add nodes, add edges,
//! validate, then hand the finished immutable structure to the executor.
//! The graph itself is a stateless template; per-run node state lives in
//! the executor.

pub mod executor;

pub use executor::{Executor, NodeReport, RetryPolicy, RunReport};

use std::collections::HashMap;
use std::fmt;

use crate::error::{
    CycleSnafu, DuplicateNodeSnafu, GraphError, SelfEdgeSnafu, UnknownNodeSnafu,
};
use crate::tasks::TaskRef;
use snafu::prelude::*;

/// Completion state of a task node within one run.
///
/// Nodes transition `Pending -> Running -> {Succeeded | Failed}` exactly
/// once. `UpstreamFailed` and `Cancelled` are terminal states entered
/// directly from `Pending`; such nodes never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    UpstreamFailed,
    Cancelled,
}

impl NodeState {
    /// Whether this state is terminal for the run.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeState::Pending | NodeState::Running)
    }
}

/// What a node does when it runs.
pub enum NodeKind {
    /// A unit of work.
    Task(TaskRef),
    /// A synchronization point with no work of its own; completes the
    /// moment all of its upstreams have succeeded.
    Barrier,
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tasks are opaque trait objects; only the kind is printable.
        match self {
            NodeKind::Task(_) => f.write_str("Task"),
            NodeKind::Barrier => f.write_str("Barrier"),
        }
    }
}

/// One node of the pipeline graph.
#[derive(Debug)]
pub struct Node {
    name: String,
    kind: NodeKind,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }
}

/// Builder for [`PipelineGraph`].
///
/// Rejects duplicate node names, edges referencing unknown nodes,
/// self-edges, and (at `build` time) cycles.
#[derive(Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    edges: Vec<(usize, usize)>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task node.
    pub fn add_task(&mut self, name: impl Into<String>, task: TaskRef) -> Result<(), GraphError> {
        self.add_node(name.into(), NodeKind::Task(task))
    }

    /// Add a barrier node.
    pub fn add_barrier(&mut self, name: impl Into<String>) -> Result<(), GraphError> {
        self.add_node(name.into(), NodeKind::Barrier)
    }

    fn add_node(&mut self, name: String, kind: NodeKind) -> Result<(), GraphError> {
        ensure!(
            !self.index.contains_key(&name),
            DuplicateNodeSnafu { name: name.as_str() }
        );
        self.index.insert(name.clone(), self.nodes.len());
        self.nodes.push(Node { name, kind });
        Ok(())
    }

    /// Add a dependency edge: `to` may not start until `from` succeeded.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let from_idx = self.lookup(from)?;
        let to_idx = self.lookup(to)?;
        ensure!(from_idx != to_idx, SelfEdgeSnafu { name: from });
        self.edges.push((from_idx, to_idx));
        Ok(())
    }

    /// Fan out: one upstream to several downstreams.
    pub fn add_edges_to_all(&mut self, from: &str, to: &[&str]) -> Result<(), GraphError> {
        for target in to {
            self.add_edge(from, target)?;
        }
        Ok(())
    }

    /// Fan in: several upstreams to one downstream.
    pub fn add_edges_from_all(&mut self, from: &[&str], to: &str) -> Result<(), GraphError> {
        for source in from {
            self.add_edge(source, to)?;
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<usize, GraphError> {
        self.index
            .get(name)
            .copied()
            .context(UnknownNodeSnafu { name })
    }

    /// Validate acyclicity and freeze the graph.
    pub fn build(self) -> Result<PipelineGraph, GraphError> {
        let node_count = self.nodes.len();
        let mut downstream = vec![Vec::new(); node_count];
        let mut upstream = vec![Vec::new(); node_count];

        for &(from, to) in &self.edges {
            // Parallel branches may declare the same edge; keep it single.
            if !downstream[from].contains(&to) {
                downstream[from].push(to);
                upstream[to].push(from);
            }
        }

        // Kahn's algorithm: any node left unordered sits on a cycle.
        let mut indegree: Vec<usize> = upstream.iter().map(Vec::len).collect();
        let mut queue: Vec<usize> = (0..node_count).filter(|&i| indegree[i] == 0).collect();
        let mut ordered = Vec::with_capacity(node_count);

        while let Some(idx) = queue.pop() {
            ordered.push(idx);
            for &next in &downstream[idx] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push(next);
                }
            }
        }

        if ordered.len() != node_count {
            let cyclic: Vec<&str> = (0..node_count)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.nodes[i].name.as_str())
                .collect();
            return CycleSnafu {
                nodes: cyclic.join(", "),
            }
            .fail();
        }

        Ok(PipelineGraph {
            nodes: self.nodes,
            downstream,
            upstream,
        })
    }
}

/// Immutable task dependency graph, reusable across runs.
#[derive(Debug)]
pub struct PipelineGraph {
    nodes: Vec<Node>,
    downstream: Vec<Vec<usize>>,
    upstream: Vec<Vec<usize>>,
}

impl PipelineGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    /// Node names in insertion order.
    pub fn node_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Direct downstream dependents of a node.
    pub fn downstream(&self, idx: usize) -> &[usize] {
        &self.downstream[idx]
    }

    /// Direct upstream dependencies of a node.
    pub fn upstream(&self, idx: usize) -> &[usize] {
        &self.upstream[idx]
    }

    /// Nodes with no upstream dependencies.
    pub fn roots(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.upstream[i].is_empty())
            .collect()
    }

    /// Every node reachable from `idx` by following downstream edges,
    /// excluding `idx` itself.
    pub fn reachable_from(&self, idx: usize) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack: Vec<usize> = self.downstream[idx].to_vec();
        let mut reachable = Vec::new();

        while let Some(next) = stack.pop() {
            if seen[next] {
                continue;
            }
            seen[next] = true;
            reachable.push(next);
            stack.extend_from_slice(&self.downstream[next]);
        }

        reachable
    }

    /// True if an edge `from -> to` exists, by node name.
    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        let (Some(from_idx), Some(to_idx)) = (self.find(from), self.find(to)) else {
            return false;
        };
        self.downstream[from_idx].contains(&to_idx)
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }
}
