//! Landmark lower bounds for the core phase
//!
//! For each configured restriction set a handful of core nodes are picked with
//! the farthest-node heuristic and exact distances from and to every core node
//! are stored. The tables are computed on the core subgraph with only the
//! edges the set always removes left out, so they stay lower bounds for any
//! query removing at least those edges.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rayon::prelude::*;

use crate::config::LandmarkConfig;
use crate::contraction::ContractedGraph;
use crate::filter::RestrictionSet;
use crate::graph::{Direction, EdgeId, NodeId, Weight, INFINITE};
use crate::weighting::Weighting;

const NOT_CORE: u32 = u32::MAX;

/// Landmark tables computed under one restriction set
#[derive(Debug, Clone)]
pub struct LandmarkSet {
    restrictions: RestrictionSet,
    landmarks: Vec<NodeId>,
    /// `from[l][i]`: landmark `l` to core node `i`
    from: Vec<Vec<Weight>>,
    /// `to[l][i]`: core node `i` to landmark `l`
    to: Vec<Vec<Weight>>,
}

impl LandmarkSet {
    pub fn restrictions(&self) -> &RestrictionSet {
        &self.restrictions
    }

    pub fn landmarks(&self) -> &[NodeId] {
        &self.landmarks
    }

    fn specificity(&self) -> usize {
        let r = &self.restrictions;
        r.avoid_features.count_ones() as usize
            + r.avoid_countries.len()
            + if r.avoid_all_borders { 64 } else { 0 }
    }
}

/// All landmark sets of one contracted graph
#[derive(Debug, Clone, Default)]
pub struct Landmarks {
    core_index: Vec<u32>,
    sets: Vec<LandmarkSet>,
}

/// A landmark set bound to the core numbering
#[derive(Debug, Clone, Copy)]
pub struct LandmarkView<'a> {
    core_index: &'a [u32],
    set: &'a LandmarkSet,
}

impl LandmarkView<'_> {
    pub fn set(&self) -> &LandmarkSet {
        self.set
    }

    /// Lower bound on the core distance `a -> b`. Zero when nothing is known.
    pub fn lower_bound(&self, a: NodeId, b: NodeId) -> Weight {
        let (ia, ib) = (self.core_index[a as usize], self.core_index[b as usize]);
        if ia == NOT_CORE || ib == NOT_CORE {
            return 0;
        }
        let (ia, ib) = (ia as usize, ib as usize);

        let mut best = 0;
        for l in 0..self.set.landmarks.len() {
            let (la, lb) = (self.set.from[l][ia], self.set.from[l][ib]);
            if la != INFINITE && lb != INFINITE {
                best = best.max(lb.saturating_sub(la));
            }
            let (al, bl) = (self.set.to[l][ia], self.set.to[l][ib]);
            if al != INFINITE && bl != INFINITE {
                best = best.max(al.saturating_sub(bl));
            }
        }
        best
    }
}

impl Landmarks {
    pub fn build(cg: &ContractedGraph, weighting: &dyn Weighting, config: &LandmarkConfig) -> Self {
        let n = cg.graph().node_count();
        let mut core_index = vec![NOT_CORE; n];
        let core: Vec<NodeId> = cg.core_nodes().collect();
        for (i, &node) in core.iter().enumerate() {
            core_index[node as usize] = i as u32;
        }

        if core.is_empty() || config.count == 0 {
            return Self {
                core_index,
                sets: Vec::new(),
            };
        }

        let sets = config
            .sets
            .iter()
            .map(|requested| {
                let restrictions = definite(requested);
                if &restrictions != requested {
                    tracing::warn!(
                        ?requested,
                        "landmark sets only honour feature and border restrictions"
                    );
                }
                let builder = TableBuilder {
                    cg,
                    weighting,
                    core_index: &core_index,
                    core: &core,
                    restrictions: &restrictions,
                };
                let landmarks = builder.select(config.count);
                let (from, to): (Vec<_>, Vec<_>) = landmarks
                    .par_iter()
                    .map(|&l| (builder.distances(l, Direction::Forward), builder.distances(l, Direction::Backward)))
                    .unzip();
                tracing::info!(
                    landmarks = landmarks.len(),
                    core_nodes = core.len(),
                    restrictions = ?restrictions,
                    "landmark set ready"
                );
                LandmarkSet {
                    restrictions,
                    landmarks,
                    from,
                    to,
                }
            })
            .collect();

        Self { core_index, sets }
    }

    pub fn sets(&self) -> &[LandmarkSet] {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// The most specific set whose restrictions the query also applies
    pub fn select(&self, query: Option<&RestrictionSet>) -> Option<LandmarkView<'_>> {
        let query = query?;
        self.sets
            .iter()
            .filter(|s| s.restrictions.is_subset_of(query))
            .max_by_key(|s| s.specificity())
            .map(|set| LandmarkView {
                core_index: &self.core_index,
                set,
            })
    }
}

/// The part of a restriction set that removes edges regardless of request
/// parameters
fn definite(set: &RestrictionSet) -> RestrictionSet {
    RestrictionSet {
        avoid_features: set.avoid_features,
        avoid_countries: set.avoid_countries.clone(),
        avoid_all_borders: set.avoid_all_borders,
        ..RestrictionSet::none()
    }
}

struct TableBuilder<'a> {
    cg: &'a ContractedGraph,
    weighting: &'a dyn Weighting,
    core_index: &'a [u32],
    core: &'a [NodeId],
    restrictions: &'a RestrictionSet,
}

impl TableBuilder<'_> {
    fn usable(&self, id: EdgeId) -> bool {
        !self.restrictions.restricts_edge(self.cg.graph(), id)
    }

    /// Single or multi source Dijkstra over the core subgraph, indexed by core position
    fn search(&self, sources: &[NodeId], direction: Direction) -> Vec<Weight> {
        let graph = self.cg.graph();
        let mut dist = vec![INFINITE; self.core.len()];
        let mut heap = BinaryHeap::new();
        for &s in sources {
            dist[self.core_index[s as usize] as usize] = 0;
            heap.push(Reverse((0 as Weight, s)));
        }

        while let Some(Reverse((d, u))) = heap.pop() {
            if d > dist[self.core_index[u as usize] as usize] {
                continue;
            }
            for cursor in graph.edges_of(u) {
                let vi = self.core_index[cursor.to as usize];
                if vi == NOT_CORE || !cursor.allows(direction) || !self.usable(cursor.id) {
                    continue;
                }
                let orientation = cursor.travel_orientation(direction);
                let Some(w) = self.weighting.edge_weight(cursor.edge, orientation) else {
                    continue;
                };
                let nd = d.saturating_add(w);
                if nd < dist[vi as usize] {
                    dist[vi as usize] = nd;
                    heap.push(Reverse((nd, cursor.to)));
                }
            }
        }
        dist
    }

    fn distances(&self, landmark: NodeId, direction: Direction) -> Vec<Weight> {
        self.search(&[landmark], direction)
    }

    /// Farthest-node selection starting from the lowest core node
    fn select(&self, count: usize) -> Vec<NodeId> {
        let count = count.min(self.core.len());
        let mut chosen: Vec<NodeId> = Vec::with_capacity(count);
        let mut seeds = vec![self.core[0]];

        while chosen.len() < count {
            let dist = self.search(&seeds, Direction::Forward);
            let unreached = dist
                .iter()
                .position(|&d| d == INFINITE)
                .map(|i| self.core[i]);
            let farthest = dist
                .iter()
                .enumerate()
                .filter(|(_, &d)| d != INFINITE)
                .max_by_key(|(i, &d)| (d, Reverse(*i)))
                .map(|(i, _)| self.core[i]);

            let Some(next) = unreached.or(farthest).filter(|n| !chosen.contains(n)) else {
                break;
            };
            chosen.push(next);
            seeds = chosen.clone();
        }
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contraction::{CorePredicate, PrepareCore};
    use crate::graph::{features, Edge, GraphBuilder};
    use crate::weighting::{Profile, ShortestWeighting};
    use rustc_hash::FxHashSet;

    /// Ring of 6 core nodes, one ferry edge
    fn ring() -> ContractedGraph {
        let mut b = GraphBuilder::new();
        for i in 0..6 {
            b.node(50.0, 4.0 + i as f64 * 0.001);
        }
        for i in 0..6u32 {
            let e = Edge::new(i, (i + 1) % 6, 100.0, 30.0);
            b.edge(if i == 2 { e.with_features(features::FERRIES) } else { e });
        }
        let core: FxHashSet<NodeId> = (0..6).collect();
        let w = ShortestWeighting::new(Profile::Car);
        PrepareCore::new(b.build().unwrap(), &w, CorePredicate::CoreNodes(core))
            .run()
            .unwrap()
    }

    #[test]
    fn test_bounds_are_admissible() {
        let cg = ring();
        let w = ShortestWeighting::new(Profile::Car);
        let config = LandmarkConfig {
            count: 2,
            sets: vec![RestrictionSet::none()],
        };
        let lm = Landmarks::build(&cg, &w, &config);
        let view = lm.select(Some(&RestrictionSet::none())).unwrap();
        assert_eq!(view.set().landmarks().len(), 2);
        assert_eq!(view.set().landmarks()[0], 3, "farthest from node 0");

        for a in 0..6u32 {
            for b in 0..6u32 {
                let ring_dist = (a as i32 - b as i32).unsigned_abs().min(6 - (a as i32 - b as i32).unsigned_abs());
                assert!(view.lower_bound(a, b) <= ring_dist * 1000, "{} -> {}", a, b);
            }
        }
        assert_eq!(view.lower_bound(0, 3), 3000);
    }

    #[test]
    fn test_set_selection_requires_subset() {
        let cg = ring();
        let w = ShortestWeighting::new(Profile::Car);
        let ferries = RestrictionSet {
            avoid_features: features::FERRIES,
            ..Default::default()
        };
        let config = LandmarkConfig {
            count: 2,
            sets: vec![RestrictionSet::none(), ferries.clone()],
        };
        let lm = Landmarks::build(&cg, &w, &config);

        let chosen = lm.select(Some(&ferries)).unwrap();
        assert_eq!(chosen.set().restrictions(), &ferries);
        let chosen = lm.select(Some(&RestrictionSet::none())).unwrap();
        assert!(chosen.set().restrictions().is_empty());
        assert!(lm.select(None).is_none());

        // without the ferry 2 - 3 the ring distance 2 -> 3 is five hops
        let view = lm.select(Some(&ferries)).unwrap();
        assert!(view.lower_bound(2, 3) <= 5000);
    }
}
