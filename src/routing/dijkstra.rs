//! Plain Dijkstra over the original edges
//!
//! Shortcuts are never relaxed, so the search is exact for any filter chain.
//! Supports reverse searches (incoming edges), a cost bound, a settled-node
//! budget and time-dependent costs. A reverse time-dependent search treats the
//! departure time as the arrival time and walks the clock backwards.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

use super::spt::{Spt, SptEntry};
use super::Path;
use crate::filter::FilterChain;
use crate::graph::{Direction, EdgeCursor, EdgeId, NodeId, RoadGraph, Weight, INFINITE};
use crate::weighting::{Cost, Departure, Weighting};

/// Result of one search
#[derive(Debug, Clone)]
pub struct SearchTree {
    pub source: NodeId,
    pub reverse: bool,
    pub spt: Spt,
    pub settled: FxHashSet<NodeId>,
    /// The settled-node budget ran out before the search finished
    pub truncated: bool,
}

impl SearchTree {
    pub fn weight(&self, node: NodeId) -> Option<Weight> {
        self.settled
            .contains(&node)
            .then(|| self.spt.weight(node))
            .flatten()
    }

    pub fn entry(&self, node: NodeId) -> Option<&SptEntry> {
        if self.settled.contains(&node) {
            self.spt.get(node)
        } else {
            None
        }
    }

    /// Edges from the root to `node`, root side first
    pub fn edges_to(&self, node: NodeId) -> Option<Vec<EdgeId>> {
        let index = self.spt.index_of(node)?;
        Some(self.spt.trace(index).into_iter().filter_map(|(_, e)| e).collect())
    }
}

pub struct Dijkstra<'a> {
    graph: &'a RoadGraph,
    weighting: &'a dyn Weighting,
    filter: &'a FilterChain,
    reverse: bool,
    max_weight: Weight,
    max_visited: usize,
    departure: Option<Departure<'a>>,
}

impl<'a> Dijkstra<'a> {
    pub fn new(graph: &'a RoadGraph, weighting: &'a dyn Weighting, filter: &'a FilterChain) -> Self {
        Self {
            graph,
            weighting,
            filter,
            reverse: false,
            max_weight: INFINITE - 1,
            max_visited: usize::MAX,
            departure: None,
        }
    }

    /// Search incoming edges
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Nodes with a higher cost are neither labelled nor expanded
    pub fn max_weight(mut self, max_weight: Weight) -> Self {
        self.max_weight = max_weight;
        self
    }

    pub fn max_visited(mut self, max_visited: usize) -> Self {
        self.max_visited = max_visited;
        self
    }

    pub fn departure(mut self, departure: Option<Departure<'a>>) -> Self {
        self.departure = departure;
        self
    }

    pub fn direction(&self) -> Direction {
        if self.reverse {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    /// The edge may be relaxed out of `cursor.from`
    pub fn traversable(&self, cursor: &EdgeCursor<'_>) -> bool {
        let direction = self.direction();
        !cursor.edge.is_shortcut()
            && cursor.allows(direction)
            && self.filter.accept(self.graph, cursor, direction)
    }

    /// Cost of relaxing `cursor` from a node labelled `label`
    pub fn edge_cost(&self, cursor: &EdgeCursor<'_>, label: &SptEntry) -> Option<Cost> {
        match &self.departure {
            None => self
                .weighting
                .edge_cost(cursor.edge, cursor.travel_orientation(self.direction())),
            Some(dep) => {
                let travel_from = if self.reverse { cursor.to } else { cursor.from };
                let clock = dep.clock(label.duration, self.reverse);
                dep.cost(self.weighting, self.graph, cursor.id, travel_from, clock)
            }
        }
    }

    /// Search until exhausted or the bound is reached
    pub fn run(&self, source: NodeId) -> SearchTree {
        self.run_until(source, |_, _| false)
    }

    /// Search until `stop` returns true for a settled node
    pub fn run_until<F>(&self, source: NodeId, mut stop: F) -> SearchTree
    where
        F: FnMut(NodeId, &SptEntry) -> bool,
    {
        let mut tree = SearchTree {
            source,
            reverse: self.reverse,
            spt: Spt::new(),
            settled: FxHashSet::default(),
            truncated: false,
        };
        let mut heap = BinaryHeap::new();
        let root = tree.spt.add_root(source, 0, 0, 0.0);
        heap.push(Reverse((0 as Weight, source, root)));

        while let Some(Reverse((weight, u, index))) = heap.pop() {
            if tree.settled.contains(&u) || tree.spt.index_of(u) != Some(index) {
                continue;
            }
            if tree.settled.len() >= self.max_visited {
                tree.truncated = true;
                break;
            }
            tree.settled.insert(u);
            let label = *tree.spt.entry(index);
            if stop(u, &label) {
                break;
            }

            for cursor in self.graph.edges_of(u) {
                let v = cursor.to;
                if v == u || tree.settled.contains(&v) || !self.traversable(&cursor) {
                    continue;
                }
                let Some(cost) = self.edge_cost(&cursor, &label) else {
                    continue;
                };
                let Some(nw) = weight.checked_add(cost.weight).filter(|w| *w <= self.max_weight)
                else {
                    continue;
                };
                if tree.spt.weight(v).is_some_and(|cur| cur <= nw) {
                    continue;
                }
                let next = tree.spt.push(SptEntry {
                    node: v,
                    edge: Some(cursor.id),
                    weight: nw,
                    duration: label.duration.saturating_add(cost.duration),
                    distance: label.distance + cursor.edge.distance,
                    parent: index,
                });
                heap.push(Reverse((nw, v, next)));
            }
        }

        tracing::debug!(
            source,
            reverse = self.reverse,
            settled = tree.settled.len(),
            truncated = tree.truncated,
            "dijkstra finished"
        );
        tree
    }

    /// Shortest path `source -> target`, `None` if unreachable within bounds
    pub fn route(&self, source: NodeId, target: NodeId) -> Option<Path> {
        if source == target {
            return Some(Path::at(source));
        }
        let tree = self.run_until(source, |n, _| n == target);
        tree.weight(target)?;
        let edges = tree.edges_to(target)?;
        let path = Path::build(
            self.graph,
            self.weighting,
            source,
            &edges,
            self.departure.as_ref(),
        )?;
        Some(path)
    }
}
