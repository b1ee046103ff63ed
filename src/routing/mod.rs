//! Path searches
//!
//! - [`dijkstra`]: plain (optionally time-dependent, bounded) search over the
//!   original edges, used for fallbacks, accessibility maps and matrices
//! - [`core_alt`]: core-restricted bidirectional search over the contracted graph
//! - [`one_to_many`]: shared-tree core search feeding the matrix driver

use crate::graph::{EdgeId, NodeId, RoadGraph, Weight};
use crate::weighting::{Cost, Departure, Weighting};

pub mod core_alt;
pub mod dijkstra;
pub mod one_to_many;
pub mod spt;
pub mod unpack;

pub use core_alt::{CoreRouter, CoreSearchStats};
pub use dijkstra::{Dijkstra, SearchTree};
pub use spt::{Spt, SptEntry};

/// A route over original edges
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<NodeId>,
    pub edges: Vec<EdgeId>,
    pub weight: Weight,
    /// Deciseconds
    pub duration: Weight,
    /// Metres
    pub distance: f64,
}

impl Path {
    /// Zero-length path
    pub fn at(node: NodeId) -> Self {
        Self {
            nodes: vec![node],
            edges: Vec::new(),
            weight: 0,
            duration: 0,
            distance: 0.0,
        }
    }

    /// Expand `edges` (shortcuts allowed) from `source` and total the costs of
    /// the original edges. `None` if an edge has no weight.
    pub fn build(
        graph: &RoadGraph,
        weighting: &dyn Weighting,
        source: NodeId,
        edges: &[EdgeId],
        departure: Option<&Departure<'_>>,
    ) -> Option<Path> {
        let (nodes, edges) = unpack::unpack_path(graph, source, edges);
        let mut total = Cost::default();
        let mut distance = 0.0;

        for (i, &id) in edges.iter().enumerate() {
            let edge = graph.edge(id);
            let cost = match departure {
                Some(dep) => {
                    dep.cost(weighting, graph, id, nodes[i], dep.clock(total.duration, false))?
                }
                None => weighting.edge_cost(edge, edge.orientation_from(nodes[i]))?,
            };
            total.weight = total.weight.checked_add(cost.weight)?;
            total.duration = total.duration.checked_add(cost.duration)?;
            distance += edge.distance;
        }

        Some(Path {
            nodes,
            edges,
            weight: total.weight,
            duration: total.duration,
            distance,
        })
    }

    pub fn source(&self) -> NodeId {
        self.nodes[0]
    }

    pub fn target(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Seconds
    pub fn time(&self) -> f64 {
        self.duration as f64 / 10.0
    }
}

