// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use crate::dag::node::{NodeKey, PhaseNode};
use crate::errors::{Result, RetrioError};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct Adjacency {
    /// Direct dependencies: nodes that must succeed before this one runs.
    deps: Vec<NodeKey>,
    /// Direct dependents: nodes that depend on this one.
    dependents: Vec<NodeKey>,
}

/// In-memory DAG over the phase nodes of one iteration, keyed by [`NodeKey`].
///
/// External (cross-iteration) dependencies are not part of this graph; they
/// are resolved against the ledger at submission time.
#[derive(Debug, Clone)]
pub struct PhaseGraph {
    nodes: BTreeMap<NodeKey, Adjacency>,
}

impl PhaseGraph {
    /// Build adjacency from an ordered node list.
    ///
    /// Every dependency must name a node in the list; dangling edges are a
    /// construction bug surfaced as an error rather than ignored.
    pub fn from_nodes(nodes: &[PhaseNode]) -> Result<Self> {
        let mut map: BTreeMap<NodeKey, Adjacency> = BTreeMap::new();

        for node in nodes {
            map.insert(
                node.key,
                Adjacency {
                    deps: node.deps.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        for node in nodes {
            for dep in &node.deps {
                match map.get_mut(dep) {
                    Some(adj) => adj.dependents.push(node.key),
                    None => {
                        return Err(RetrioError::Config(format!(
                            "node {} depends on {}, which is not in the plan",
                            node.key, dep
                        )));
                    }
                }
            }
        }

        let graph = Self { nodes: map };
        graph.assert_acyclic()?;
        Ok(graph)
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.keys()
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, key: &NodeKey) -> &[NodeKey] {
        self.nodes.get(key).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, key: &NodeKey) -> &[NodeKey] {
        self.nodes
            .get(key)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// The full downstream closure of the given roots: every node reachable
    /// by following dependency edges forward, roots included.
    ///
    /// Resubmitting any node always cascades to 100% of this closure;
    /// partial cascades are not supported.
    pub fn downstream_closure(&self, roots: &[NodeKey]) -> BTreeSet<NodeKey> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<NodeKey> = roots
            .iter()
            .filter(|k| self.contains(k))
            .copied()
            .collect();

        while let Some(key) = stack.pop() {
            if !closure.insert(key) {
                continue;
            }
            stack.extend(self.dependents_of(&key).iter().copied());
        }

        closure
    }

    /// Every built plan must be acyclic; a cycle is a builder bug.
    fn assert_acyclic(&self) -> Result<()> {
        let mut graph: DiGraph<NodeKey, ()> = DiGraph::new();
        let mut indices = BTreeMap::new();

        for key in self.nodes.keys() {
            indices.insert(*key, graph.add_node(*key));
        }
        for (key, adj) in &self.nodes {
            for dep in &adj.deps {
                graph.add_edge(indices[dep], indices[key], ());
            }
        }

        match toposort(&graph, None) {
            Ok(_) => Ok(()),
            Err(cycle) => {
                let node = graph[cycle.node_id()];
                Err(RetrioError::Config(format!(
                    "cycle detected in phase DAG involving {node}"
                )))
            }
        }
    }
}
