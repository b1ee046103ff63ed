//! Bounded local witness search
//!
//! Forward Dijkstra from one in-neighbour of the node being contracted. It
//! skips the node itself, already contracted nodes and restricted edges, and
//! stops once every target is settled, the cost bound is passed or the settled
//! limit is hit. Targets left unsettled get a shortcut.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashMap;

use crate::graph::{Direction, Edge, EdgeId, NodeId, Weight};

/// Read-only view of the graph under contraction
pub(super) struct WitnessGraph<'a> {
    pub edges: &'a [Edge],
    /// Weights base -> adj and adj -> base
    pub weights: &'a [[Option<Weight>; 2]],
    pub adjacency: &'a [Vec<EdgeId>],
    pub contracted: &'a [bool],
    pub restricted: &'a [bool],
}

impl WitnessGraph<'_> {
    fn is_restricted(&self, id: EdgeId) -> bool {
        self.restricted.get(id as usize).copied().unwrap_or(false)
    }
}

/// Witness distances from `source` to the `targets` it reached within bounds
pub(super) fn witness_search(
    graph: &WitnessGraph<'_>,
    source: NodeId,
    avoid: NodeId,
    targets: &[NodeId],
    max_weight: Weight,
    settled_limit: usize,
) -> FxHashMap<NodeId, Weight> {
    let mut dist: FxHashMap<NodeId, Weight> = FxHashMap::default();
    let mut found: FxHashMap<NodeId, Weight> = FxHashMap::default();
    let mut heap = BinaryHeap::new();
    let mut settled = 0usize;

    dist.insert(source, 0);
    heap.push(Reverse((0 as Weight, source)));

    while let Some(Reverse((d, u))) = heap.pop() {
        if dist.get(&u).is_some_and(|&best| d > best) {
            continue;
        }
        if d > max_weight {
            break;
        }
        if targets.contains(&u) {
            found.insert(u, d);
            if found.len() == targets.len() {
                break;
            }
        }
        settled += 1;
        if settled > settled_limit {
            break;
        }

        for &id in &graph.adjacency[u as usize] {
            let edge = &graph.edges[id as usize];
            let v = edge.other(u);
            if v == avoid || v == u || graph.contracted[v as usize] || graph.is_restricted(id) {
                continue;
            }
            let slot = match edge.orientation_from(u) {
                Direction::Forward => 0,
                Direction::Backward => 1,
            };
            let Some(w) = graph.weights[id as usize][slot] else {
                continue;
            };
            let nd = d.saturating_add(w);
            if nd > max_weight {
                continue;
            }
            if dist.get(&v).map_or(true, |&best| nd < best) {
                dist.insert(v, nd);
                heap.push(Reverse((nd, v)));
            }
        }
    }

    found
}
