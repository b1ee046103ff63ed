//! Bounded single-source search
//!
//! Builds the accessibility map of one origin: every node reachable within a
//! cost bound, with its cost and predecessor, plus the frontier edges the bound
//! cuts through. Searches run over original edges only, so any filter chain
//! and time-dependent speeds are honoured exactly.

use std::time::Instant;

use crate::filter::FilterChain;
use crate::graph::{NodeId, RoadGraph, Weight};
use crate::routing::{Dijkstra, SearchTree, SptEntry};
use crate::weighting::{Departure, Weighting};

pub mod frontier;

pub use frontier::FrontierEdge;

/// Query statistics
#[derive(Debug, Default, Clone)]
pub struct RangeStats {
    pub settled: usize,
    pub frontier_edges: usize,
    /// The visit budget ran out; the map is incomplete
    pub truncated: bool,
    pub elapsed_ms: u64,
}

/// Nodes reachable from one origin within one bound
#[derive(Debug, Clone)]
pub struct AccessibilityMap {
    pub origin: NodeId,
    pub max_weight: Weight,
    /// Costs are towards the origin rather than from it
    pub reverse: bool,
    tree: SearchTree,
    frontier: Vec<FrontierEdge>,
    pub stats: RangeStats,
}

impl AccessibilityMap {
    pub fn get(&self, node: NodeId) -> Option<&SptEntry> {
        self.tree.entry(node)
    }

    pub fn weight(&self, node: NodeId) -> Option<Weight> {
        self.tree.weight(node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.tree.settled.contains(&node)
    }

    pub fn len(&self) -> usize {
        self.tree.settled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.settled.is_empty()
    }

    /// Reachable nodes in ascending id order
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.tree.settled.iter().copied().collect();
        nodes.sort_unstable();
        nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &SptEntry)> + '_ {
        self.nodes()
            .into_iter()
            .filter_map(move |n| self.tree.entry(n).map(|e| (n, e)))
    }

    pub fn frontier(&self) -> &[FrontierEdge] {
        &self.frontier
    }

    pub fn tree(&self) -> &SearchTree {
        &self.tree
    }
}

/// Reusable bounded search over one graph, weighting and filter chain
pub struct RangeSearch<'a> {
    graph: &'a RoadGraph,
    weighting: &'a dyn Weighting,
    filter: &'a FilterChain,
    departure: Option<Departure<'a>>,
    max_visited: usize,
}

impl<'a> RangeSearch<'a> {
    pub fn new(graph: &'a RoadGraph, weighting: &'a dyn Weighting, filter: &'a FilterChain) -> Self {
        Self {
            graph,
            weighting,
            filter,
            departure: None,
            max_visited: usize::MAX,
        }
    }

    /// Time-dependent variant. In a reverse search the time is the arrival time.
    pub fn departure(mut self, departure: Option<Departure<'a>>) -> Self {
        self.departure = departure;
        self
    }

    pub fn max_visited(mut self, max_visited: usize) -> Self {
        self.max_visited = max_visited;
        self
    }

    pub fn query(&self, origin: NodeId, max_weight: Weight, reverse: bool) -> AccessibilityMap {
        let start = Instant::now();
        let dijkstra = Dijkstra::new(self.graph, self.weighting, self.filter)
            .reverse(reverse)
            .max_weight(max_weight)
            .max_visited(self.max_visited)
            .departure(self.departure);

        let tree = dijkstra.run(origin);
        let frontier = frontier::extract(self.graph, &dijkstra, &tree, max_weight);

        let stats = RangeStats {
            settled: tree.settled.len(),
            frontier_edges: frontier.len(),
            truncated: tree.truncated,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        tracing::debug!(
            origin,
            max_weight,
            reverse,
            settled = stats.settled,
            frontier = stats.frontier_edges,
            truncated = stats.truncated,
            "accessibility map built"
        );

        AccessibilityMap {
            origin,
            max_weight,
            reverse,
            tree,
            frontier,
            stats,
        }
    }
}

/// Static bounded search with no visit budget
pub fn bounded_search(
    graph: &RoadGraph,
    weighting: &dyn Weighting,
    filter: &FilterChain,
    origin: NodeId,
    max_weight: Weight,
    reverse: bool,
) -> AccessibilityMap {
    RangeSearch::new(graph, weighting, filter).query(origin, max_weight, reverse)
}

/// Validate range query properties
pub mod validate {
    use super::*;

    #[derive(Debug)]
    pub struct MonotonicityResult {
        pub passed: bool,
        pub violations: Vec<String>,
        pub thresholds_tested: Vec<Weight>,
        pub settled_counts: Vec<usize>,
    }

    /// reachable(T1) ⊆ reachable(T2) for T1 < T2, with equal costs on the
    /// nodes both reach. `thresholds` must be ascending.
    pub fn check_monotonicity(
        search: &RangeSearch<'_>,
        origin: NodeId,
        reverse: bool,
        thresholds: &[Weight],
    ) -> MonotonicityResult {
        let mut violations = Vec::new();
        let mut settled_counts = Vec::new();
        let mut prev: Option<AccessibilityMap> = None;

        for &threshold in thresholds {
            let map = search.query(origin, threshold, reverse);
            settled_counts.push(map.len());

            if let Some(prev) = &prev {
                for (node, entry) in prev.iter() {
                    match map.weight(node) {
                        None => violations.push(format!(
                            "Node {} was reachable at T={} but not at T={}",
                            node, prev.max_weight, threshold
                        )),
                        Some(w) if w != entry.weight => violations.push(format!(
                            "Node {} cost {} at T={} but {} at T={}",
                            node, entry.weight, prev.max_weight, w, threshold
                        )),
                        Some(_) => {}
                    }
                    if violations.len() >= 10 {
                        break;
                    }
                }
            }
            prev = Some(map);
        }

        MonotonicityResult {
            passed: violations.is_empty(),
            violations,
            thresholds_tested: thresholds.to_vec(),
            settled_counts,
        }
    }
}
