//! Frontier extraction on original edges
//!
//! A frontier edge leaves a settled node but cannot be travelled to its end
//! within the bound. The cut fraction locates the point where the bound is
//! crossed, which is what isochrone polygons are built around.

use crate::geo;
use crate::graph::{Coordinate, EdgeId, NodeId, RoadGraph, Weight};
use crate::routing::{Dijkstra, SearchTree};

/// An edge the bound cuts through
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierEdge {
    pub edge: EdgeId,
    /// Settled end
    pub from: NodeId,
    pub to: NodeId,
    /// Cost from the origin to `from`
    pub cost_from: Weight,
    /// Traversal cost of the edge out of `from`
    pub edge_weight: Weight,
    /// Fraction along `from -> to` where the bound is crossed (0.0 to 1.0)
    pub cut_fraction: f64,
}

impl FrontierEdge {
    /// Interpolated location of the cut
    pub fn cut_point(&self, graph: &RoadGraph) -> Coordinate {
        geo::interpolate(
            graph.coordinate(self.from),
            graph.coordinate(self.to),
            self.cut_fraction,
        )
    }
}

/// Frontier of `tree`, ordered by settled node then edge id.
///
/// An edge whose far end is settled too is skipped when the portions reachable
/// from both ends already cover it.
pub(super) fn extract(
    graph: &RoadGraph,
    dijkstra: &Dijkstra<'_>,
    tree: &SearchTree,
    max_weight: Weight,
) -> Vec<FrontierEdge> {
    let mut settled: Vec<NodeId> = tree.settled.iter().copied().collect();
    settled.sort_unstable();

    let mut frontier = Vec::new();
    for u in settled {
        let Some(label) = tree.entry(u) else {
            continue;
        };
        let left = max_weight - label.weight;

        for cursor in graph.edges_of(u) {
            if cursor.to == u || !dijkstra.traversable(&cursor) {
                continue;
            }
            let Some(cost) = dijkstra.edge_cost(&cursor, label) else {
                continue;
            };
            if cost.weight <= left {
                continue;
            }
            if let Some(far) = tree.weight(cursor.to) {
                let from_far = (max_weight - far) as u64;
                if left as u64 + from_far >= cost.weight as u64 {
                    continue;
                }
            }
            frontier.push(FrontierEdge {
                edge: cursor.id,
                from: u,
                to: cursor.to,
                cost_from: label.weight,
                edge_weight: cost.weight,
                cut_fraction: left as f64 / cost.weight as f64,
            });
        }
    }
    frontier
}
