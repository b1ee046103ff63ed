//! One-to-many core search
//!
//! Backward upward trees are built once per destination. Each source then
//! runs one forward upward search plus an exhaustive core search, and every
//! destination's distance is the best combination over the nodes of its
//! backward tree.

use rayon::prelude::*;

use super::core_alt::{CoreRouter, Side};
use super::spt::Spt;
use crate::contraction::ContractedGraph;
use crate::error::Result;
use crate::filter::FilterChain;
use crate::graph::{NodeId, Weight};
use crate::weighting::Weighting;

/// Totals of the best path found for one pair
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Label {
    pub weight: Weight,
    /// Deciseconds
    pub duration: Weight,
    /// Metres
    pub distance: f64,
}

/// Backward upward tree of one destination
pub struct BackwardTree {
    spt: Spt,
}

pub struct OneToMany<'a> {
    router: CoreRouter<'a>,
}

impl<'a> OneToMany<'a> {
    pub fn new(
        cg: &'a ContractedGraph,
        weighting: &'a dyn Weighting,
        filter: &'a FilterChain,
        max_visited: usize,
    ) -> Result<Self> {
        let router = CoreRouter::new(cg, weighting, filter, None)?.max_visited(max_visited);
        Ok(Self { router })
    }

    /// `None` entries ran over the visit budget
    pub fn backward_trees(&self, targets: &[NodeId]) -> Vec<Option<BackwardTree>> {
        targets
            .par_iter()
            .map(|&t| self.router.backward_tree(t).map(|side: Side| BackwardTree { spt: side.spt }))
            .collect()
    }

    /// Best labels from `source` to each tree's destination
    pub fn row(&self, source: NodeId, trees: &[Option<BackwardTree>]) -> Vec<Option<Label>> {
        let Some(forward) = self.router.forward_tree(source) else {
            tracing::debug!(source, "forward tree over budget");
            return vec![None; trees.len()];
        };

        trees
            .iter()
            .map(|tree| {
                let tree = tree.as_ref()?;
                tree.spt
                    .nodes()
                    .filter_map(|b| {
                        let f = forward.spt.get(b.node)?;
                        Some(Label {
                            weight: f.weight.checked_add(b.weight)?,
                            duration: f.duration.saturating_add(b.duration),
                            distance: f.distance + b.distance,
                        })
                    })
                    .min_by(|a, b| a.weight.cmp(&b.weight).then(a.distance.total_cmp(&b.distance)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contraction::{CorePredicate, PrepareCore};
    use crate::filter::RestrictionSet;
    use crate::graph::{features, Edge, GraphBuilder};
    use crate::routing::Dijkstra;
    use crate::weighting::{FastestWeighting, Profile};

    #[test]
    fn test_rows_match_dijkstra() {
        let mut b = GraphBuilder::new();
        for i in 0..8 {
            b.node(50.0 + (i / 4) as f64 * 0.001, 4.0 + (i % 4) as f64 * 0.001);
        }
        for (a, c, d) in [(0, 1, 70.0), (1, 2, 70.0), (2, 3, 70.0), (4, 5, 70.0), (5, 6, 70.0), (6, 7, 70.0), (0, 4, 110.0), (3, 7, 110.0)] {
            b.road(a, c, d, 40.0);
        }
        b.edge(Edge::new(1, 6, 120.0, 40.0).with_features(features::TOLLWAYS));
        b.edge(Edge::new(5, 2, 120.0, 40.0).oneway());
        let graph = b.build().unwrap();

        let w = FastestWeighting::new(Profile::Car);
        let cg = PrepareCore::new(graph, &w, CorePredicate::RestrictedEdges(RestrictionSet::everything()))
            .run()
            .unwrap();
        let chain = FilterChain::new();
        let otm = OneToMany::new(&cg, &w, &chain, usize::MAX).unwrap();
        let targets: Vec<NodeId> = (0..8).collect();
        let trees = otm.backward_trees(&targets);
        let plain = Dijkstra::new(cg.graph(), &w, &chain);

        for s in 0..8 {
            let row = otm.row(s, &trees);
            for (t, label) in targets.iter().zip(row) {
                let expected = plain.route(s, *t).map(|p| p.weight);
                assert_eq!(label.map(|l| l.weight), expected, "{} -> {}", s, t);
            }
        }
    }
}
