//! Directed acyclic graph over entity types.
//!
//! Used by the mapping resolver to turn declared parent relationships into a
//! deterministic phase order. Edges point from parent to child.
//!
//! **Note:** This module is internal to `strata-migrate`.

use std::collections::{HashMap, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use crate::error::ConfigError;

/// A directed graph with deterministic topological sorting.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Insertion order for deterministic tie-breaking in toposort.
    insertion_order: Vec<NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    /// Creates a new empty DAG.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_order: Vec::new(),
        }
    }

    /// Adds a node, returning its index. Adding an existing node is a no-op.
    pub(crate) fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_order.push(idx);
        idx
    }

    /// Adds a directed edge `from -> to` between nodes returned by `add_node`.
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        self.graph.add_edge(from, to, ());
    }

    fn insertion_position(&self, idx: NodeIndex) -> usize {
        self.insertion_order
            .iter()
            .position(|&i| i == idx)
            .unwrap_or(usize::MAX)
    }

    /// Returns a topologically sorted list of nodes.
    ///
    /// Uses Kahn's algorithm with deterministic tie-breaking: when multiple
    /// nodes have zero in-degree, they are processed in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::CycleDetected` naming every node left unsorted.
    pub(crate) fn toposort(&self) -> Result<Vec<T>, ConfigError> {
        let node_count = self.graph.node_count();
        let mut in_degree: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|idx| (idx, 0))
            .collect();
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|&&idx| in_degree.get(&idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut result = Vec::with_capacity(node_count);

        while let Some(idx) = queue.pop_front() {
            if let Some(node) = self.graph.node_weight(idx) {
                result.push(node.clone());
            }

            let mut neighbors: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .collect();
            neighbors.sort_by_key(|n| self.insertion_position(*n));

            for neighbor in neighbors {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if result.len() != node_count {
            let cycle = self
                .insertion_order
                .iter()
                .filter(|&&idx| in_degree.get(&idx).copied().unwrap_or(0) > 0)
                .filter_map(|&idx| self.graph.node_weight(idx))
                .map(ToString::to_string)
                .collect();
            return Err(ConfigError::CycleDetected { cycle });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_dag_sorts_to_nothing() {
        let dag: Dag<String> = Dag::new();
        assert!(dag.toposort().unwrap().is_empty());
    }

    #[test]
    fn linear_dag_sorts_correctly() {
        let mut dag: Dag<String> = Dag::new();
        let c = dag.add_node("note".into());
        let a = dag.add_node("account".into());
        let b = dag.add_node("department".into());
        dag.add_edge(a, b);
        dag.add_edge(b, c);

        assert_eq!(dag.toposort().unwrap(), vec!["account", "department", "note"]);
    }

    #[test]
    fn independent_roots_keep_insertion_order() {
        let mut dag: Dag<String> = Dag::new();
        dag.add_node("zeta".into());
        dag.add_node("alpha".into());
        assert_eq!(dag.toposort().unwrap(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn duplicate_add_node_is_noop() {
        let mut dag: Dag<String> = Dag::new();
        let first = dag.add_node("term".into());
        let second = dag.add_node("term".into());
        assert_eq!(first, second);
        assert_eq!(dag.toposort().unwrap().len(), 1);
    }

    #[test]
    fn dag_detects_cycle() {
        let mut dag: Dag<String> = Dag::new();
        dag.add_node("account".into());
        let a = dag.add_node("subject".into());
        let b = dag.add_node("unit".into());
        dag.add_edge(a, b);
        dag.add_edge(b, a);

        match dag.toposort() {
            Err(ConfigError::CycleDetected { cycle }) => {
                assert_eq!(cycle, vec!["subject".to_string(), "unit".to_string()]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }
}
