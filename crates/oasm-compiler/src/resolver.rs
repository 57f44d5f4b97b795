//! Placeholder dependency resolver.
//!
//! A [`DependencyGraph`] collects nodes during the declare pass and edges
//! during the resolve-dependencies pass. [`DependencyGraph::sort`] consumes
//! it with Kahn's algorithm, yielding one node at a time so the caller can
//! resolve each node before the next is pulled. A graph can be sorted once;
//! adding to it afterwards is an internal fault.

use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

use oasm_core::{CompileError, Result};

/// Directed graph where an edge `a -> b` means `a` must resolve before `b`.
pub struct DependencyGraph<T> {
    graph: DiGraph<T, ()>,
    index: FxHashMap<T, NodeIndex>,
    sorted: bool,
}

impl<T: Clone + Eq + Hash + Display> Default for DependencyGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash + Display> DependencyGraph<T> {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: FxHashMap::default(),
            sorted: false,
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.sorted {
            return Err(CompileError::internal(
                "attempted to add to an already sorted dependency graph",
            ));
        }
        Ok(())
    }

    fn node(&mut self, node: T) -> NodeIndex {
        if let Some(&index) = self.index.get(&node) {
            return index;
        }
        let index = self.graph.add_node(node.clone());
        self.index.insert(node, index);
        index
    }

    /// Register a node. Registering it again has no effect.
    pub fn add_node(&mut self, node: T) -> Result<()> {
        self.ensure_open()?;
        self.node(node);
        Ok(())
    }

    /// Record that `dependent` waits for `dependency`.
    pub fn add_edge(&mut self, dependency: T, dependent: T) -> Result<()> {
        self.ensure_open()?;
        let source = self.node(dependency);
        let target = self.node(dependent);
        self.graph.add_edge(source, target, ());
        Ok(())
    }

    /// Start sorting. The graph is closed from this point on.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn sort(&mut self) -> Result<Sort<'_, T>> {
        self.ensure_open()?;
        self.sorted = true;

        let mut inbound: Vec<usize> = vec![0; self.graph.node_count()];
        for edge in self.graph.raw_edges() {
            inbound[edge.target().index()] += 1;
        }

        // Stack order: the first registered source is popped first.
        let backlog: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .rev()
            .filter(|n| inbound[n.index()] == 0)
            .collect();

        Ok(Sort {
            graph: &self.graph,
            inbound,
            backlog,
            remaining: self.graph.node_count(),
            failed: false,
        })
    }
}

/// Lazy topological order over a [`DependencyGraph`].
///
/// Yields `Err(CyclicDependency)` once if nodes remain after the backlog ran
/// dry, then stops.
pub struct Sort<'a, T> {
    graph: &'a DiGraph<T, ()>,
    inbound: Vec<usize>,
    backlog: Vec<NodeIndex>,
    remaining: usize,
    failed: bool,
}

impl<T: Clone + Display> Iterator for Sort<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(node) = self.backlog.pop() {
            for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let count = &mut self.inbound[dependent.index()];
                *count -= 1;
                if *count == 0 {
                    self.backlog.push(dependent);
                }
            }
            self.remaining -= 1;
            return Some(Ok(self.graph[node].clone()));
        }

        if self.remaining > 0 && !self.failed {
            self.failed = true;
            let nodes = self
                .graph
                .node_indices()
                .filter(|n| self.inbound[n.index()] > 0)
                .map(|n| self.graph[n].to_string())
                .collect();
            return Some(Err(CompileError::CyclicDependency { nodes }));
        }

        None
    }
}
