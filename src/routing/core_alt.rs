//! Core-restricted bidirectional search
//!
//! Phase 1 runs an upward search from each end outside the core; core nodes
//! reached are entry points and are not expanded. Phase 2 continues both
//! searches inside the core as A* towards the other side's entries, bounded by
//! the landmark tables and by beeline distance. Any node labelled by both
//! sides yields a candidate path; the search stops once either side's smallest
//! key reaches the best candidate.
//!
//! Time-dependent queries run phase 2 forward only, evaluating edges at the
//! arrival time, and the final cost is recomputed over the unpacked path.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rustc_hash::FxHashSet;

use super::spt::{Spt, SptEntry};
use super::Path;
use crate::contraction::ContractedGraph;
use crate::error::{Error, Result};
use crate::filter::FilterChain;
use crate::graph::{Direction, EdgeCursor, EdgeId, NodeId, Weight, INFINITE};
use crate::landmarks::LandmarkView;
use crate::weighting::{Cost, Departure, Weighting};

#[derive(Debug, Clone, Default)]
pub struct CoreSearchStats {
    pub visited_upward: usize,
    pub visited_core: usize,
    pub forward_entries: usize,
    pub backward_entries: usize,
    pub landmarks: bool,
}

pub(super) struct Side {
    direction: Direction,
    pub(super) spt: Spt,
    settled: FxHashSet<NodeId>,
    heap: BinaryHeap<Reverse<(Weight, NodeId, usize)>>,
    /// Core nodes settled by the upward search with their weights
    entries: Vec<(NodeId, Weight)>,
}

impl Side {
    fn new(direction: Direction, root: NodeId) -> Self {
        let mut spt = Spt::new();
        let index = spt.add_root(root, 0, 0, 0.0);
        let mut heap = BinaryHeap::new();
        heap.push(Reverse((0, root, index)));
        Self {
            direction,
            spt,
            settled: FxHashSet::default(),
            heap,
            entries: Vec::new(),
        }
    }

    fn empty(direction: Direction) -> Self {
        Self {
            direction,
            spt: Spt::new(),
            settled: FxHashSet::default(),
            heap: BinaryHeap::new(),
            entries: Vec::new(),
        }
    }

    /// Pop the next live heap item
    fn pop(&mut self) -> Option<(NodeId, usize)> {
        while let Some(Reverse((_, node, index))) = self.heap.pop() {
            if !self.settled.contains(&node) && self.spt.index_of(node) == Some(index) {
                return Some((node, index));
            }
        }
        None
    }

    /// Smallest live key, dropping stale items
    fn min_key(&mut self) -> Option<Weight> {
        while let Some(Reverse((key, node, index))) = self.heap.peek().copied() {
            if self.settled.contains(&node) || self.spt.index_of(node) != Some(index) {
                self.heap.pop();
                continue;
            }
            return Some(key);
        }
        None
    }
}

#[derive(Debug, Clone, Copy)]
struct Best {
    weight: Weight,
    meeting: Option<NodeId>,
}

impl Best {
    fn offer(&mut self, node: NodeId, weight: Weight) {
        if weight < self.weight {
            self.weight = weight;
            self.meeting = Some(node);
        }
    }
}

pub struct CoreRouter<'a> {
    cg: &'a ContractedGraph,
    weighting: &'a dyn Weighting,
    filter: &'a FilterChain,
    landmarks: Option<LandmarkView<'a>>,
    max_visited: usize,
    departure: Option<Departure<'a>>,
}

impl<'a> CoreRouter<'a> {
    /// Fails when the contracted graph cannot answer this weighting and chain
    /// exactly
    pub fn new(
        cg: &'a ContractedGraph,
        weighting: &'a dyn Weighting,
        filter: &'a FilterChain,
        departure: Option<Departure<'a>>,
    ) -> Result<Self> {
        check_admissible(cg, weighting, filter, departure.is_some())?;
        Ok(Self {
            cg,
            weighting,
            filter,
            landmarks: None,
            max_visited: usize::MAX,
            departure,
        })
    }

    pub fn landmarks(mut self, landmarks: Option<LandmarkView<'a>>) -> Self {
        // landmark bounds use static weights
        self.landmarks = if self.departure.is_some() { None } else { landmarks };
        self
    }

    pub fn max_visited(mut self, max_visited: usize) -> Self {
        self.max_visited = max_visited;
        self
    }

    pub fn route(&self, source: NodeId, target: NodeId) -> Result<Option<Path>> {
        Ok(self.route_with_stats(source, target)?.0)
    }

    pub fn route_with_stats(
        &self,
        source: NodeId,
        target: NodeId,
    ) -> Result<(Option<Path>, CoreSearchStats)> {
        let n = self.cg.graph().node_count();
        if source as usize >= n || target as usize >= n {
            return Err(Error::InvalidRequest(format!(
                "node {} or {} is outside the graph",
                source, target
            )));
        }

        let mut stats = CoreSearchStats {
            landmarks: self.landmarks.is_some(),
            ..Default::default()
        };
        if source == target {
            return Ok((Some(Path::at(source)), stats));
        }

        let mut fwd = Side::new(Direction::Forward, source);
        let mut bwd = Side::new(Direction::Backward, target);
        let mut visited = 0usize;

        if !self.upward(&mut fwd, &mut visited) || !self.upward(&mut bwd, &mut visited) {
            tracing::debug!(source, target, visited, "upward search over budget");
            return Ok((None, stats));
        }
        stats.visited_upward = visited;
        stats.forward_entries = fwd.entries.len();
        stats.backward_entries = bwd.entries.len();

        let mut best = Best {
            weight: INFINITE,
            meeting: None,
        };
        for entry in fwd.spt.nodes() {
            if let Some(b) = bwd.spt.weight(entry.node) {
                best.offer(entry.node, entry.weight.saturating_add(b));
            }
        }

        if !fwd.entries.is_empty() && !bwd.entries.is_empty() {
            let within_budget = if self.departure.is_some() {
                self.core_forward_only(&mut fwd, &bwd, &mut best, &mut visited)
            } else {
                self.core_bidirectional(&mut fwd, &mut bwd, &mut best, &mut visited)
            };
            stats.visited_core = visited - stats.visited_upward;
            if !within_budget {
                tracing::debug!(source, target, visited, "core search over budget");
                return Ok((None, stats));
            }
        }

        let Some(meeting) = best.meeting else {
            tracing::debug!(source, target, visited, "no path");
            return Ok((None, stats));
        };

        let edges = self.edges_through(&fwd, &bwd, meeting);
        let path = Path::build(
            self.cg.graph(),
            self.weighting,
            source,
            &edges,
            self.departure.as_ref(),
        );
        if let (Some(p), None) = (&path, &self.departure) {
            debug_assert_eq!(p.weight, best.weight, "unpacked weight differs from search weight");
        }

        tracing::debug!(
            source,
            target,
            weight = best.weight,
            upward = stats.visited_upward,
            core = stats.visited_core,
            entries_fwd = stats.forward_entries,
            entries_bwd = stats.backward_entries,
            "core route"
        );
        Ok((path, stats))
    }

    fn cost(&self, cursor: &EdgeCursor<'_>, label: &SptEntry, direction: Direction) -> Option<Cost> {
        match (&self.departure, direction) {
            (Some(dep), Direction::Forward) => dep.cost(
                self.weighting,
                self.cg.graph(),
                cursor.id,
                cursor.from,
                dep.clock(label.duration, false),
            ),
            _ => self
                .weighting
                .edge_cost(cursor.edge, cursor.travel_orientation(direction)),
        }
    }

    /// Relax `cursor` out of a settled label, returning the new label weight
    /// if it improved
    fn relax(
        &self,
        side: &mut Side,
        cursor: &EdgeCursor<'_>,
        index: usize,
        heuristic: Weight,
    ) -> Option<Weight> {
        let label = *side.spt.entry(index);
        let v = cursor.to;
        if side.settled.contains(&v)
            || !cursor.allows(side.direction)
            || !self.filter.accept(self.cg.graph(), cursor, side.direction)
        {
            return None;
        }
        let cost = self.cost(cursor, &label, side.direction)?;
        let weight = label.weight.checked_add(cost.weight).filter(|w| *w < INFINITE)?;
        if side.spt.weight(v).is_some_and(|cur| cur <= weight) {
            return None;
        }
        let next = side.spt.push(SptEntry {
            node: v,
            edge: Some(cursor.id),
            weight,
            duration: label.duration.saturating_add(cost.duration),
            distance: label.distance + cursor.edge.distance,
            parent: index,
        });
        side.heap.push(Reverse((weight.saturating_add(heuristic), v, next)));
        Some(weight)
    }

    /// Upward search outside the core. False when over budget.
    fn upward(&self, side: &mut Side, visited: &mut usize) -> bool {
        let graph = self.cg.graph();
        while let Some((u, index)) = side.pop() {
            side.settled.insert(u);
            *visited += 1;
            if *visited > self.max_visited {
                return false;
            }
            if self.cg.is_core(u) {
                side.entries.push((u, side.spt.entry(index).weight));
                continue;
            }
            for cursor in graph.edges_of(u) {
                if cursor.to != u && self.cg.is_upward(u, cursor.to) {
                    self.relax(side, &cursor, index, 0);
                }
            }
        }
        true
    }

    /// Bound from `node` to the other side through its entries: the larger
    /// of the landmark and beeline bounds. Both assume static weights.
    fn heuristic(&self, node: NodeId, direction: Direction, other_entries: &[(NodeId, Weight)]) -> Weight {
        if self.departure.is_some() || (self.landmarks.is_none() && self.cg.beeline_rate() <= 0.0) {
            return 0;
        }
        other_entries
            .iter()
            .map(|&(entry, tail)| {
                let (from, to) = match direction {
                    Direction::Forward => (node, entry),
                    Direction::Backward => (entry, node),
                };
                let landmark = self.landmarks.map_or(0, |lm| lm.lower_bound(from, to));
                landmark.max(self.cg.beeline_bound(from, to)).saturating_add(tail)
            })
            .min()
            .unwrap_or(0)
    }

    /// Re-seed a side's heap with its core entries for phase 2
    fn seed_core(&self, side: &mut Side, other_entries: &[(NodeId, Weight)]) {
        side.heap.clear();
        for &(node, weight) in &side.entries {
            side.settled.remove(&node);
            if let Some(index) = side.spt.index_of(node) {
                let h = self.heuristic(node, side.direction, other_entries);
                side.heap.push(Reverse((weight.saturating_add(h), node, index)));
            }
        }
    }

    /// Expand the next node of `side` inside the core
    fn core_step(
        &self,
        side: &mut Side,
        other: &Side,
        best: &mut Best,
        visited: &mut usize,
    ) -> Option<bool> {
        let (u, index) = side.pop()?;
        side.settled.insert(u);
        *visited += 1;
        if *visited > self.max_visited {
            return Some(false);
        }

        for cursor in self.cg.graph().edges_of(u) {
            let v = cursor.to;
            if v == u || !self.cg.is_core(v) {
                continue;
            }
            let h = self.heuristic(v, side.direction, &other.entries);
            if let Some(weight) = self.relax(side, &cursor, index, h) {
                if let Some(tail) = other.spt.weight(v) {
                    best.offer(v, weight.saturating_add(tail));
                }
            }
        }
        Some(true)
    }

    fn core_bidirectional(&self, fwd: &mut Side, bwd: &mut Side, best: &mut Best, visited: &mut usize) -> bool {
        let fwd_entries = fwd.entries.clone();
        let bwd_entries = bwd.entries.clone();
        self.seed_core(fwd, &bwd_entries);
        self.seed_core(bwd, &fwd_entries);

        loop {
            let (Some(kf), Some(kb)) = (fwd.min_key(), bwd.min_key()) else {
                return true;
            };
            if kf >= best.weight || kb >= best.weight {
                return true;
            }
            let step = if kf <= kb {
                self.core_step(fwd, bwd, best, visited)
            } else {
                self.core_step(bwd, fwd, best, visited)
            };
            match step {
                Some(true) => {}
                Some(false) => return false,
                None => return true,
            }
        }
    }

    fn core_forward_only(&self, fwd: &mut Side, bwd: &Side, best: &mut Best, visited: &mut usize) -> bool {
        self.seed_core(fwd, &[]);
        loop {
            match fwd.min_key() {
                Some(k) if k < best.weight => {}
                _ => return true,
            }
            match self.core_step(fwd, bwd, best, visited) {
                Some(true) => {}
                Some(false) => return false,
                None => return true,
            }
        }
    }

    /// Upward search from `source` followed by an exhaustive core search.
    /// `None` when over budget.
    pub(super) fn forward_tree(&self, source: NodeId) -> Option<Side> {
        let mut side = Side::new(Direction::Forward, source);
        let mut visited = 0;
        if !self.upward(&mut side, &mut visited) {
            return None;
        }
        let none = Side::empty(Direction::Backward);
        let mut unused = Best {
            weight: INFINITE,
            meeting: None,
        };
        self.seed_core(&mut side, &[]);
        loop {
            match self.core_step(&mut side, &none, &mut unused, &mut visited) {
                Some(true) => {}
                Some(false) => return None,
                None => return Some(side),
            }
        }
    }

    /// Upward search towards `target`. `None` when over budget.
    pub(super) fn backward_tree(&self, target: NodeId) -> Option<Side> {
        let mut side = Side::new(Direction::Backward, target);
        let mut visited = 0;
        self.upward(&mut side, &mut visited).then_some(side)
    }

    /// Source to target edges through `meeting`, in travel order
    fn edges_through(&self, fwd: &Side, bwd: &Side, meeting: NodeId) -> Vec<EdgeId> {
        let trace = |side: &Side| -> Vec<EdgeId> {
            side.spt
                .index_of(meeting)
                .map(|i| side.spt.trace(i).into_iter().filter_map(|(_, e)| e).collect())
                .unwrap_or_default()
        };
        let mut edges = trace(fwd);
        let mut tail = trace(bwd);
        tail.reverse();
        edges.extend(tail);
        edges
    }
}

/// The contracted graph answers `filter` under `weighting` exactly
pub fn check_admissible(
    cg: &ContractedGraph,
    weighting: &dyn Weighting,
    filter: &FilterChain,
    time_dependent: bool,
) -> Result<()> {
    if cg.weighting() != weighting.key() {
        return Err(Error::InvalidRequest(format!(
            "contracted graph was prepared for weighting '{}', request uses '{}'",
            cg.weighting(),
            weighting.key()
        )));
    }
    let requested = filter.restrictions().map(|mut r| {
        r.time_dependent |= time_dependent;
        r
    });
    match &requested {
        Some(r) if r.is_subset_of(cg.coverage()) => Ok(()),
        _ => Err(Error::RestrictionSetMismatch {
            requested,
            covered: cg.coverage().clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LandmarkConfig;
    use crate::contraction::{CorePredicate, PrepareCore};
    use crate::filter::{EdgeFilter, RestrictionSet};
    use crate::graph::{features, Edge, GraphBuilder, RoadGraph};
    use crate::landmarks::Landmarks;
    use crate::routing::Dijkstra;
    use crate::weighting::{Profile, ShortestWeighting};

    /// 3 x 4 grid, 100 m spacing, with a ferry in the middle row
    fn grid() -> RoadGraph {
        let mut b = GraphBuilder::new();
        for r in 0..3 {
            for c in 0..4 {
                b.node(50.0 + r as f64 * 0.001, 4.0 + c as f64 * 0.0015);
            }
        }
        let id = |r: u32, c: u32| r * 4 + c;
        for r in 0..3 {
            for c in 0..4 {
                if c + 1 < 4 {
                    let e = Edge::new(id(r, c), id(r, c + 1), 100.0, 30.0);
                    b.edge(if r == 1 && c == 1 { e.with_features(features::FERRIES) } else { e });
                }
                if r + 1 < 3 {
                    b.road(id(r, c), id(r + 1, c), 120.0, 30.0);
                }
            }
        }
        b.edge(Edge::new(id(0, 0), id(2, 3), 900.0, 30.0).oneway());
        b.build().unwrap()
    }

    fn prepared(predicate: CorePredicate) -> ContractedGraph {
        let w = ShortestWeighting::new(Profile::Car);
        PrepareCore::new(grid(), &w, predicate).run().unwrap()
    }

    #[test]
    fn test_matches_dijkstra_without_core() {
        let cg = prepared(CorePredicate::NoCore);
        let w = ShortestWeighting::new(Profile::Car);
        let chain = FilterChain::new();
        let router = CoreRouter::new(&cg, &w, &chain, None).unwrap();
        let plain = Dijkstra::new(cg.graph(), &w, &chain);

        for s in 0..12 {
            for t in 0..12 {
                let a = router.route(s, t).unwrap().map(|p| p.weight);
                let b = plain.route(s, t).map(|p| p.weight);
                assert_eq!(a, b, "{} -> {}", s, t);
            }
        }
    }

    #[test]
    fn test_core_with_landmarks_matches_dijkstra_under_filter() {
        let ferries = RestrictionSet {
            avoid_features: features::FERRIES,
            ..Default::default()
        };
        let cg = prepared(CorePredicate::RestrictedEdges(ferries.clone()));
        assert!(cg.core_size() >= 2);
        let w = ShortestWeighting::new(Profile::Car);
        let lm = Landmarks::build(
            &cg,
            &w,
            &LandmarkConfig {
                count: 2,
                sets: vec![RestrictionSet::none()],
            },
        );

        for chain in [
            FilterChain::new(),
            FilterChain::new().with(EdgeFilter::AvoidFeatures {
                mask: features::FERRIES,
            }),
        ] {
            let router = CoreRouter::new(&cg, &w, &chain, None)
                .unwrap()
                .landmarks(lm.select(chain.restrictions().as_ref()));
            let plain = Dijkstra::new(cg.graph(), &w, &chain);
            for s in 0..12 {
                for t in 0..12 {
                    let a = router.route(s, t).unwrap();
                    let b = plain.route(s, t);
                    assert_eq!(a.as_ref().map(|p| p.weight), b.as_ref().map(|p| p.weight), "{} -> {}", s, t);
                    if let Some(p) = a {
                        assert_eq!(p.nodes.first(), Some(&s));
                        assert_eq!(p.nodes.last(), Some(&t));
                        assert!(p.edges.iter().all(|&e| !cg.graph().edge(e).is_shortcut()));
                    }
                }
            }
        }
    }

    #[test]
    fn test_beeline_bound_is_admissible() {
        let cg = prepared(CorePredicate::NoCore);
        let w = ShortestWeighting::new(Profile::Car);
        // 100 m edges join nodes about 107 m apart, so the rate drops below 10/m
        assert!(cg.beeline_rate() > 0.0 && cg.beeline_rate() < 10.0);
        assert!(cg.beeline_bound(0, 11) > 0);

        let chain = FilterChain::new();
        let plain = Dijkstra::new(cg.graph(), &w, &chain);
        for s in 0..12 {
            for t in 0..12 {
                if let Some(p) = plain.route(s, t) {
                    assert!(cg.beeline_bound(s, t) <= p.weight, "{} -> {}", s, t);
                }
            }
        }
    }

    #[test]
    fn test_uncovered_chain_is_rejected() {
        let cg = prepared(CorePredicate::NoCore);
        let w = ShortestWeighting::new(Profile::Car);
        let chain = FilterChain::new().with(EdgeFilter::AvoidFeatures {
            mask: features::FERRIES,
        });
        let err = CoreRouter::new(&cg, &w, &chain, None).err().unwrap();
        assert!(matches!(err, Error::RestrictionSetMismatch { .. }));

        let other = crate::weighting::FastestWeighting::new(Profile::Car);
        let open = FilterChain::new();
        assert!(matches!(
            CoreRouter::new(&cg, &other, &open, None).err().unwrap(),
            Error::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_visit_budget_gives_unreachable() {
        let cg = prepared(CorePredicate::NoCore);
        let w = ShortestWeighting::new(Profile::Car);
        let chain = FilterChain::new();
        let router = CoreRouter::new(&cg, &w, &chain, None).unwrap().max_visited(1);
        assert_eq!(router.route(0, 11).unwrap(), None);
    }
}
