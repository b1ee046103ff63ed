//! Snapping coordinates onto graph nodes

use rstar::{primitives::GeomWithData, RTree};

use super::{Coordinate, NodeId, RoadGraph};
use crate::geo::distance;

/// Nearest-neighbour candidates examined per snap. Ordering in the tree is
/// planar degrees, so a few candidates are re-ranked by haversine distance.
const SNAP_CANDIDATES: usize = 8;

/// R-tree over the coordinates of nodes that have at least one edge
pub struct NodeLocator {
    tree: RTree<GeomWithData<[f64; 2], NodeId>>,
}

impl NodeLocator {
    pub fn build(graph: &RoadGraph) -> Self {
        let points = (0..graph.node_count() as NodeId)
            .filter(|&n| graph.degree(n) > 0)
            .map(|n| {
                let c = graph.coordinate(n);
                GeomWithData::new([c.lon, c.lat], n)
            })
            .collect();

        Self {
            tree: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Closest node within `radius` metres, with its distance
    pub fn snap(&self, coord: Coordinate, radius: f64) -> Option<(NodeId, f64)> {
        if !coord.is_valid() {
            return None;
        }

        self.tree
            .nearest_neighbor_iter(&[coord.lon, coord.lat])
            .take(SNAP_CANDIDATES)
            .map(|p| {
                let [lon, lat] = *p.geom();
                (p.data, distance(coord, Coordinate::new(lat, lon)))
            })
            .filter(|&(_, d)| d <= radius)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
    }
}
