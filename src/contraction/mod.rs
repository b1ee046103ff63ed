//! Core contraction
//!
//! Contracts every node outside the core in priority order, inserting
//! shortcuts where no witness path exists, and assigns levels. Core nodes are
//! left untouched and all share the top level. Preparation mutates the graph
//! once; the returned [`ContractedGraph`] is immutable and shared by queries.

use std::cmp::Reverse;
use std::time::Instant;

use priority_queue::PriorityQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::config::PreparationConfig;
use crate::filter::RestrictionSet;
use crate::geo;
use crate::graph::{Direction, Edge, EdgeId, NodeId, RoadGraph, Shortcut, Weight, INFINITE};
use crate::weighting::{Cost, Weighting};

mod witness;

use witness::{witness_search, WitnessGraph};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrepareError {
    #[error("fixed ordering misses {missing} non-core nodes")]
    IncompleteOrdering { missing: usize },

    #[error("fixed ordering lists node {node} which is a core node, a duplicate or out of range")]
    InvalidOrdering { node: NodeId },

    #[error("edge {edge} has no valid weight under weighting '{weighting}'")]
    InvalidWeight { edge: EdgeId, weighting: String },

    #[error("shortcut weight overflows while contracting node {node}")]
    WeightOverflow { node: NodeId },

    #[error("lazy priority updates did not settle ({updates} consecutive re-queues)")]
    PriorityLoop { updates: usize },
}

/// Which nodes stay uncontracted
#[derive(Debug, Clone)]
pub enum CorePredicate {
    /// Contract everything
    NoCore,
    /// Keep exactly these nodes
    CoreNodes(FxHashSet<NodeId>),
    /// Keep every endpoint of an edge the set restricts
    RestrictedEdges(RestrictionSet),
}

#[derive(Debug, Clone, Default)]
pub struct PrepareStats {
    pub nodes: usize,
    pub core_nodes: usize,
    pub contracted: usize,
    pub shortcuts: usize,
    pub periodic_updates: usize,
    pub lazy_updates: usize,
    pub neighbour_updates: usize,
    pub witness_searches: usize,
    pub took_ms: u64,
}

/// Graph plus shortcuts, levels and core flags
#[derive(Debug)]
pub struct ContractedGraph {
    graph: RoadGraph,
    levels: Vec<u32>,
    core: Vec<bool>,
    core_level: u32,
    weighting: String,
    coverage: RestrictionSet,
    /// Weight per metre of beeline no original edge undercuts
    beeline_rate: f64,
    stats: PrepareStats,
}

impl ContractedGraph {
    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    pub fn level(&self, node: NodeId) -> u32 {
        self.levels[node as usize]
    }

    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    pub fn is_core(&self, node: NodeId) -> bool {
        self.core[node as usize]
    }

    pub fn core_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.core
            .iter()
            .enumerate()
            .filter(|(_, &c)| c)
            .map(|(n, _)| n as NodeId)
    }

    pub fn core_size(&self) -> usize {
        self.stats.core_nodes
    }

    /// Level shared by all core nodes
    pub fn core_level(&self) -> u32 {
        self.core_level
    }

    /// Key of the weighting the shortcuts were computed with
    pub fn weighting(&self) -> &str {
        &self.weighting
    }

    /// Restrictions the core keeps exact
    pub fn coverage(&self) -> &RestrictionSet {
        &self.coverage
    }

    pub fn stats(&self) -> &PrepareStats {
        &self.stats
    }

    pub fn beeline_rate(&self) -> f64 {
        self.beeline_rate
    }

    /// Lower bound on the static weight of any path between `a` and `b`
    pub fn beeline_bound(&self, a: NodeId, b: NodeId) -> Weight {
        if self.beeline_rate <= 0.0 {
            return 0;
        }
        let metres = geo::distance(self.graph.coordinate(a), self.graph.coordinate(b));
        // keep float error on the safe side
        let bound = (self.beeline_rate * metres * (1.0 - 1e-9)).floor();
        if bound.is_finite() && bound > 0.0 {
            bound.min((INFINITE - 1) as f64) as Weight
        } else {
            0
        }
    }

    /// Travel `from -> to` goes up (or stays level) in the hierarchy
    pub fn is_upward(&self, from: NodeId, to: NodeId) -> bool {
        self.levels[to as usize] >= self.levels[from as usize]
    }
}

/// Builder for one contraction run
pub struct PrepareCore<'w> {
    graph: RoadGraph,
    weighting: &'w dyn Weighting,
    predicate: CorePredicate,
    config: PreparationConfig,
    order: Option<Vec<NodeId>>,
}

impl<'w> PrepareCore<'w> {
    pub fn new(graph: RoadGraph, weighting: &'w dyn Weighting, predicate: CorePredicate) -> Self {
        Self {
            graph,
            weighting,
            predicate,
            config: PreparationConfig::default(),
            order: None,
        }
    }

    pub fn with_config(mut self, config: PreparationConfig) -> Self {
        self.config = config;
        self
    }

    /// Contract non-core nodes in exactly this order
    pub fn with_order(mut self, order: Vec<NodeId>) -> Self {
        self.order = Some(order);
        self
    }

    pub fn run(self) -> Result<ContractedGraph, PrepareError> {
        let start = Instant::now();
        let PrepareCore {
            mut graph,
            weighting,
            predicate,
            config,
            order,
        } = self;

        let n = graph.node_count();
        let (restricted, core, coverage) = classify(&graph, &predicate);
        let core_nodes = core.iter().filter(|&&c| c).count();

        tracing::info!(
            nodes = n,
            edges = graph.edge_count(),
            core_nodes,
            weighting = %weighting.key(),
            "preparing core"
        );

        let mut state = Contraction::new(&graph, weighting, restricted, &config)?;
        let mut stats = PrepareStats {
            nodes: n,
            core_nodes,
            ..Default::default()
        };

        match order {
            Some(order) => state.contract_fixed(&order, &core, &mut stats)?,
            None => state.contract_by_priority(&core, &config, &mut stats)?,
        }

        let core_level = n as u32;
        for (node, &is_core) in core.iter().enumerate() {
            if is_core {
                state.levels[node] = core_level;
            }
        }

        let beeline_rate = beeline_rate(&graph, weighting);
        let levels = std::mem::take(&mut state.levels);
        let shortcuts = state.edges.split_off(state.n_original);
        stats.shortcuts = shortcuts.len();
        graph.append_shortcuts(shortcuts);
        stats.took_ms = start.elapsed().as_millis() as u64;

        tracing::info!(
            contracted = stats.contracted,
            core_nodes = stats.core_nodes,
            shortcuts = stats.shortcuts,
            witness_searches = stats.witness_searches,
            took_ms = stats.took_ms,
            "core prepared"
        );

        Ok(ContractedGraph {
            graph,
            levels,
            core,
            core_level,
            weighting: weighting.key(),
            coverage,
            beeline_rate,
            stats,
        })
    }
}

/// Smallest weight per beeline metre over the traversable original edges,
/// capped by the weighting's own bound. Beelines obey the triangle
/// inequality, so any path costs at least this rate times its end-to-end
/// beeline.
fn beeline_rate(graph: &RoadGraph, weighting: &dyn Weighting) -> f64 {
    let cap = weighting.min_weight(1000.0) as f64 / 1000.0;
    graph
        .original_edges()
        .filter_map(|(_, edge)| {
            let metres = geo::distance(graph.coordinate(edge.base), graph.coordinate(edge.adj));
            if metres <= 0.0 {
                return None;
            }
            let weight = [(Direction::Forward, edge.forward), (Direction::Backward, edge.backward)]
                .into_iter()
                .filter(|&(_, open)| open)
                .filter_map(|(orientation, _)| weighting.edge_weight(edge, orientation))
                .min()?;
            Some(weight as f64 / metres)
        })
        .fold(cap, f64::min)
}

/// Restricted original edges, core flags and the coverage they imply
fn classify(graph: &RoadGraph, predicate: &CorePredicate) -> (Vec<bool>, Vec<bool>, RestrictionSet) {
    let n = graph.node_count();
    let mut core = vec![false; n];
    let mut restricted = vec![false; graph.original_edge_count()];

    match predicate {
        CorePredicate::NoCore => (restricted, core, RestrictionSet::none()),
        CorePredicate::CoreNodes(nodes) => {
            for &node in nodes {
                if (node as usize) < n {
                    core[node as usize] = true;
                }
            }
            (restricted, core, RestrictionSet::none())
        }
        CorePredicate::RestrictedEdges(set) => {
            for (id, edge) in graph.original_edges() {
                if set.restricts_edge(graph, id) {
                    restricted[id as usize] = true;
                    core[edge.base as usize] = true;
                    core[edge.adj as usize] = true;
                }
            }
            (restricted, core, set.clone())
        }
    }
}

/// A shortcut candidate `from -> to` through the contracted node
#[derive(Debug, Clone, Copy)]
struct Candidate {
    from: NodeId,
    to: NodeId,
    cost: Cost,
    distance: f64,
    originals: u32,
    skipped: [EdgeId; 2],
}

/// Neighbour reached through the cheapest incident edge, with the cost of
/// travelling it towards or away from the contracted node
#[derive(Debug, Clone, Copy)]
struct Link {
    node: NodeId,
    edge: EdgeId,
    cost: Cost,
}

/// Index of a stored orientation in the per-edge cost pairs
fn slot(orientation: Direction) -> usize {
    match orientation {
        Direction::Forward => 0,
        Direction::Backward => 1,
    }
}

struct Contraction {
    edges: Vec<Edge>,
    n_original: usize,
    /// Costs base -> adj and adj -> base, `None` where not traversable
    costs: Vec<[Option<Cost>; 2]>,
    weights: Vec<[Option<Weight>; 2]>,
    /// Original edges each edge stands for
    originals: Vec<u32>,
    adjacency: Vec<Vec<EdgeId>>,
    restricted: Vec<bool>,
    contracted: Vec<bool>,
    contracted_neighbours: Vec<u32>,
    levels: Vec<u32>,
    next_level: u32,
    settled_limit: usize,
}

impl Contraction {
    fn new(
        graph: &RoadGraph,
        weighting: &dyn Weighting,
        restricted: Vec<bool>,
        config: &PreparationConfig,
    ) -> Result<Self, PrepareError> {
        let n = graph.node_count();
        let edges: Vec<Edge> = graph.original_edges().map(|(_, e)| e.clone()).collect();

        let mut costs = Vec::with_capacity(edges.len());
        for (id, edge) in edges.iter().enumerate() {
            let mut pair = [None; 2];
            for (orientation, open) in [
                (Direction::Forward, edge.forward),
                (Direction::Backward, edge.backward),
            ] {
                if !open {
                    continue;
                }
                let cost = weighting.edge_cost(edge, orientation).ok_or_else(|| {
                    PrepareError::InvalidWeight {
                        edge: id as EdgeId,
                        weighting: weighting.key(),
                    }
                })?;
                pair[slot(orientation)] = Some(cost);
            }
            costs.push(pair);
        }

        let mut adjacency = vec![Vec::new(); n];
        for (id, edge) in edges.iter().enumerate() {
            if edge.base == edge.adj || !(edge.forward || edge.backward) {
                continue;
            }
            adjacency[edge.base as usize].push(id as EdgeId);
            adjacency[edge.adj as usize].push(id as EdgeId);
        }

        Ok(Self {
            n_original: edges.len(),
            weights: costs.iter().map(|pair| pair.map(|c| c.map(|c| c.weight))).collect(),
            originals: vec![1; edges.len()],
            costs,
            edges,
            adjacency,
            restricted,
            contracted: vec![false; n],
            contracted_neighbours: vec![0; n],
            levels: vec![0; n],
            next_level: 0,
            settled_limit: config.witness_settled_limit,
        })
    }

    /// Cheapest arcs into and out of `v` over uncontracted neighbours
    fn arcs(&self, v: NodeId) -> (Vec<Link>, Vec<Link>) {
        let mut incoming: FxHashMap<NodeId, Link> = FxHashMap::default();
        let mut outgoing: FxHashMap<NodeId, Link> = FxHashMap::default();

        for &id in &self.adjacency[v as usize] {
            let edge = &self.edges[id as usize];
            let u = edge.other(v);
            if self.contracted[u as usize] {
                continue;
            }
            let costs = &self.costs[id as usize];
            if let Some(cost) = costs[slot(edge.orientation_from(v))] {
                Self::keep_cheaper(&mut outgoing, Link { node: u, edge: id, cost });
            }
            if let Some(cost) = costs[slot(edge.orientation_from(u))] {
                Self::keep_cheaper(&mut incoming, Link { node: u, edge: id, cost });
            }
        }

        let collect = |m: FxHashMap<NodeId, Link>| {
            let mut arcs: Vec<Link> = m.into_values().collect();
            arcs.sort_unstable_by_key(|a| a.node);
            arcs
        };
        (collect(incoming), collect(outgoing))
    }

    fn keep_cheaper(map: &mut FxHashMap<NodeId, Link>, link: Link) {
        match map.get(&link.node) {
            Some(cur) if cur.cost.weight < link.cost.weight => {}
            Some(cur) if cur.cost.weight == link.cost.weight && cur.edge < link.edge => {}
            _ => {
                map.insert(link.node, link);
            }
        }
    }

    fn neighbours(&self, v: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self.adjacency[v as usize]
            .iter()
            .map(|&id| self.edges[id as usize].other(v))
            .filter(|&u| u != v && !self.contracted[u as usize])
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Shortcuts contracting `v` would need
    fn candidates(&self, v: NodeId, stats: &mut PrepareStats) -> Result<Vec<Candidate>, PrepareError> {
        let (incoming, outgoing) = self.arcs(v);
        let mut found = Vec::new();
        if incoming.is_empty() || outgoing.is_empty() {
            return Ok(found);
        }

        let view = WitnessGraph {
            edges: &self.edges,
            weights: &self.weights,
            adjacency: &self.adjacency,
            contracted: &self.contracted,
            restricted: &self.restricted,
        };

        for arc_in in &incoming {
            let c_in = arc_in.cost;
            let targets: Vec<NodeId> = outgoing
                .iter()
                .map(|a| a.node)
                .filter(|&w| w != arc_in.node)
                .collect();
            if targets.is_empty() {
                continue;
            }

            let mut max_weight: Weight = 0;
            for arc_out in outgoing.iter().filter(|a| a.node != arc_in.node) {
                let sum = c_in
                    .weight
                    .checked_add(arc_out.cost.weight)
                    .filter(|w| *w < INFINITE)
                    .ok_or(PrepareError::WeightOverflow { node: v })?;
                max_weight = max_weight.max(sum);
            }

            stats.witness_searches += 1;
            let witnesses =
                witness_search(&view, arc_in.node, v, &targets, max_weight, self.settled_limit);

            for arc_out in outgoing.iter().filter(|a| a.node != arc_in.node) {
                let c_out = arc_out.cost;
                let weight = c_in.weight + c_out.weight;
                if witnesses.get(&arc_out.node).is_some_and(|&d| d <= weight) {
                    continue;
                }
                let duration = c_in
                    .duration
                    .checked_add(c_out.duration)
                    .filter(|d| *d < INFINITE)
                    .ok_or(PrepareError::WeightOverflow { node: v })?;
                found.push(Candidate {
                    from: arc_in.node,
                    to: arc_out.node,
                    cost: Cost { weight, duration },
                    distance: self.edges[arc_in.edge as usize].distance
                        + self.edges[arc_out.edge as usize].distance,
                    originals: self.originals[arc_in.edge as usize]
                        + self.originals[arc_out.edge as usize],
                    skipped: [arc_in.edge, arc_out.edge],
                });
            }
        }
        Ok(found)
    }

    /// Pair up `u -> w` and `w -> u` candidates over the same edges. The
    /// boolean marks a merged, bidirectional shortcut.
    fn merge(candidates: Vec<Candidate>) -> Vec<(Candidate, bool)> {
        let mut merged: Vec<(Candidate, bool)> = Vec::with_capacity(candidates.len());
        'outer: for c in candidates {
            for (m, both) in merged.iter_mut() {
                if !*both
                    && m.from == c.to
                    && m.to == c.from
                    && m.cost == c.cost
                    && m.skipped == [c.skipped[1], c.skipped[0]]
                {
                    *both = true;
                    continue 'outer;
                }
            }
            merged.push((c, false));
        }
        merged
    }

    /// `10 * edge difference + original edges + contracted neighbours`
    fn priority(&self, v: NodeId, stats: &mut PrepareStats) -> Result<i64, PrepareError> {
        let removed = self.adjacency[v as usize]
            .iter()
            .filter(|&&id| {
                let u = self.edges[id as usize].other(v);
                u != v && !self.contracted[u as usize]
            })
            .count() as i64;
        let shortcuts = Self::merge(self.candidates(v, stats)?);
        let added = shortcuts.len() as i64;
        let originals: i64 = shortcuts.iter().map(|(c, _)| c.originals as i64).sum();
        Ok(10 * (added - removed) + originals + self.contracted_neighbours[v as usize] as i64)
    }

    fn contract(&mut self, v: NodeId, stats: &mut PrepareStats) -> Result<Vec<NodeId>, PrepareError> {
        let neighbours = self.neighbours(v);
        if !neighbours.is_empty() {
            let candidates = self.candidates(v, stats)?;
            for (c, both) in Self::merge(candidates) {
                self.add_shortcut(v, c, both);
            }
        }

        self.contracted[v as usize] = true;
        self.levels[v as usize] = self.next_level;
        self.next_level += 1;
        stats.contracted += 1;
        for &u in &neighbours {
            self.contracted_neighbours[u as usize] += 1;
        }
        Ok(neighbours)
    }

    fn add_shortcut(&mut self, via: NodeId, c: Candidate, bidirectional: bool) {
        let id = self.edges.len() as EdgeId;
        self.edges.push(Edge {
            base: c.from,
            adj: c.to,
            distance: c.distance,
            speed_kmh: 0.0,
            forward: true,
            backward: bidirectional,
            features: 0,
            shortcut: Some(Shortcut {
                weight: c.cost.weight,
                duration: c.cost.duration,
                skipped: c.skipped,
                via,
            }),
        });
        let back = bidirectional.then_some(c.cost);
        self.costs.push([Some(c.cost), back]);
        self.weights.push([Some(c.cost.weight), back.map(|b| b.weight)]);
        self.originals.push(c.originals);
        self.adjacency[c.from as usize].push(id);
        self.adjacency[c.to as usize].push(id);
        tracing::trace!(from = c.from, to = c.to, via, weight = c.cost.weight, "shortcut");
    }

    fn contract_fixed(
        &mut self,
        order: &[NodeId],
        core: &[bool],
        stats: &mut PrepareStats,
    ) -> Result<(), PrepareError> {
        let n = core.len();
        let mut seen = vec![false; n];
        for &node in order {
            let idx = node as usize;
            if idx >= n || core[idx] || seen[idx] {
                return Err(PrepareError::InvalidOrdering { node });
            }
            seen[idx] = true;
        }
        let missing = (0..n).filter(|&i| !core[i] && !seen[i]).count();
        if missing > 0 {
            return Err(PrepareError::IncompleteOrdering { missing });
        }

        for &node in order {
            self.contract(node, stats)?;
        }
        Ok(())
    }

    fn contract_by_priority(
        &mut self,
        core: &[bool],
        config: &PreparationConfig,
        stats: &mut PrepareStats,
    ) -> Result<(), PrepareError> {
        let n = core.len();
        let mut queue: PriorityQueue<NodeId, Reverse<(i64, NodeId)>> = PriorityQueue::new();

        for node in 0..n as NodeId {
            if core[node as usize] {
                continue;
            }
            if self.neighbours(node).is_empty() {
                // isolated: no shortcut work
                self.contract(node, stats)?;
                continue;
            }
            let p = self.priority(node, stats)?;
            queue.push(node, Reverse((p, node)));
        }

        let to_contract = queue.len();
        let periodic_every = if config.periodic_updates == 0 {
            usize::MAX
        } else {
            (to_contract * config.periodic_updates as usize / 100).max(10)
        };
        let lazy_limit = to_contract * config.lazy_updates as usize / 100;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut contracted_here = 0usize;
        let mut last_periodic = 0usize;
        let mut requeues = 0usize;

        while !queue.is_empty() {
            if contracted_here > 0
                && contracted_here % periodic_every == 0
                && last_periodic != contracted_here
            {
                last_periodic = contracted_here;
                stats.periodic_updates += 1;
                let nodes: Vec<NodeId> = queue.iter().map(|(&node, _)| node).collect();
                for node in nodes {
                    let p = self.priority(node, stats)?;
                    queue.change_priority(&node, Reverse((p, node)));
                }
                tracing::debug!(
                    remaining = queue.len(),
                    contracted = contracted_here,
                    "periodic priority update"
                );
            }

            let Some((v, Reverse((prio, _)))) = queue.pop() else {
                break;
            };

            if queue.len() < lazy_limit {
                let fresh = self.priority(v, stats)?;
                let beaten = queue
                    .peek()
                    .is_some_and(|(_, Reverse((top, top_node)))| (fresh, v) > (*top, *top_node));
                if fresh != prio && beaten {
                    stats.lazy_updates += 1;
                    requeues += 1;
                    if requeues > queue.len() + 1 {
                        return Err(PrepareError::PriorityLoop { updates: requeues });
                    }
                    queue.push(v, Reverse((fresh, v)));
                    continue;
                }
            }
            requeues = 0;

            let neighbours = self.contract(v, stats)?;
            contracted_here += 1;

            for u in neighbours {
                if core[u as usize] || config.neighbour_updates == 0 {
                    continue;
                }
                if rng.random_range(0..100) < config.neighbour_updates {
                    let p = self.priority(u, stats)?;
                    queue.change_priority(&u, Reverse((p, u)));
                    stats.neighbour_updates += 1;
                }
            }
        }
        Ok(())
    }
}
