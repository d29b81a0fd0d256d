//! Network topology validation
//!
//! The topology is an undirected graph given as an adjacency map. It is
//! checked once before any node starts and never mutated afterwards.

use crate::error::TopologyError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tangle_ledger::NodeId;

/// One problem found in an adjacency map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyViolation {
    /// `neighbor` is listed by `node` but has no entry of its own
    UndefinedNeighbor { node: NodeId, neighbor: NodeId },
    /// `node` lists `neighbor`, but `neighbor` does not list `node`
    AsymmetricEdge { node: NodeId, neighbor: NodeId },
}

impl fmt::Display for TopologyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedNeighbor { node, neighbor } => write!(
                f,
                "Node {}, listed as a neighbor of Node {}, is not defined in the network.",
                neighbor, node
            ),
            Self::AsymmetricEdge { node, neighbor } => write!(
                f,
                "Inconsistency found: Node {} does not list Node {} as a neighbor.",
                neighbor, node
            ),
        }
    }
}

/// Check an adjacency map. Returns whether it is consistent and every
/// violation found; checking does not stop at the first problem.
pub fn validate(adjacency: &BTreeMap<NodeId, Vec<NodeId>>) -> (bool, Vec<TopologyViolation>) {
    let mut violations = Vec::new();

    for (&node, neighbors) in adjacency {
        for &neighbor in neighbors {
            let Some(back) = adjacency.get(&neighbor) else {
                violations.push(TopologyViolation::UndefinedNeighbor { node, neighbor });
                continue;
            };
            if !back.contains(&node) {
                violations.push(TopologyViolation::AsymmetricEdge { node, neighbor });
            }
        }
    }

    (violations.is_empty(), violations)
}

/// Validated, read-only adjacency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    adjacency: BTreeMap<NodeId, Vec<NodeId>>,
}

impl Topology {
    /// Validate `adjacency`, returning every violation on failure
    pub fn new(adjacency: BTreeMap<NodeId, Vec<NodeId>>) -> Result<Self, TopologyError> {
        let (consistent, violations) = validate(&adjacency);
        if !consistent {
            return Err(TopologyError::Inconsistent(violations));
        }
        Ok(Self { adjacency })
    }

    /// Ring of `n` nodes, each connected to its predecessor and successor
    pub fn ring(n: usize) -> Self {
        let n = n as NodeId;
        let adjacency = (0..n)
            .map(|id| {
                let mut neighbors = match n {
                    0 | 1 => Vec::new(),
                    2 => vec![1 - id],
                    _ => vec![(id + n - 1) % n, (id + 1) % n],
                };
                neighbors.sort_unstable();
                (id, neighbors)
            })
            .collect();
        Self { adjacency }
    }

    /// Neighbors of `node`; empty for unknown nodes
    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.adjacency.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.adjacency.keys().copied()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.adjacency.contains_key(&node)
    }

    pub fn len(&self) -> usize {
        self.adjacency.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adjacency.is_empty()
    }

    pub fn adjacency(&self) -> &BTreeMap<NodeId, Vec<NodeId>> {
        &self.adjacency
    }
}
