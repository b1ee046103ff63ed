//! Graph builders shared by the integration tests

#![allow(dead_code)]

use butterfly_reach::graph::{features, BorderCrossing, Edge, GraphBuilder, VehicleRestriction};
use butterfly_reach::{NodeId, RoadGraph};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Degrees of latitude per metre
pub const LAT_PER_M: f64 = 1.0 / 111_139.0;

/// `rows` x `cols` lattice with `spacing` metres between neighbours, all
/// roads two-way at `speed` km/h. Node id is `row * cols + col`.
pub fn grid(rows: u32, cols: u32, spacing: f64, speed: f64) -> RoadGraph {
    let mut b = GraphBuilder::new();
    let step = spacing * LAT_PER_M;
    for r in 0..rows {
        for c in 0..cols {
            // 1.556 keeps east-west spacing close to north-south at 50°N
            b.node(50.0 + r as f64 * step, 4.0 + c as f64 * step * 1.556);
        }
    }
    for r in 0..rows {
        for c in 0..cols {
            let n = r * cols + c;
            if c + 1 < cols {
                b.road(n, n + 1, spacing, speed);
            }
            if r + 1 < rows {
                b.road(n, n + cols, spacing, speed);
            }
        }
    }
    b.build().expect("grid is valid")
}

/// Two-way roads at 30 km/h from `(a, b, metres)` triples. Edges whose index
/// is listed in `ferries` carry the ferry bit. Nodes sit on a north-south line.
pub fn small_graph(edges: &[(NodeId, NodeId, f64)], ferries: &[usize]) -> RoadGraph {
    let mut b = GraphBuilder::new();
    let n = edges.iter().map(|&(a, c, _)| a.max(c)).max().map_or(0, |m| m + 1);
    for i in 0..n {
        b.node(50.0 + i as f64 * 0.001, 4.0);
    }
    for (i, &(a, c, d)) in edges.iter().enumerate() {
        let edge = Edge::new(a, c, d, 30.0);
        b.edge(if ferries.contains(&i) { edge.with_features(features::FERRIES) } else { edge });
    }
    b.build().expect("small graph is valid")
}

/// ```text
/// 5--1---2
///     \ /|
///      0 |
///     /  |
///    4---3
/// ```
pub const SIX_NODE_EDGES: [(NodeId, NodeId, f64); 7] = [
    (0, 1, 1.0),
    (0, 2, 1.0),
    (0, 4, 3.0),
    (1, 2, 2.0),
    (2, 3, 1.0),
    (4, 3, 2.0),
    (5, 1, 2.0),
];

/// ```text
///    3---4--5
///   /\   |  |
///  2--0  6--7
///  | / \   /
///  |/   \ /
///  1-----8
/// ```
pub const NINE_NODE_EDGES: [(NodeId, NodeId, f64); 13] = [
    (0, 1, 1.0),
    (0, 2, 1.0),
    (0, 3, 5.0),
    (0, 8, 1.0),
    (1, 2, 1.0),
    (1, 8, 2.0),
    (2, 3, 2.0),
    (3, 4, 2.0),
    (4, 5, 1.0),
    (4, 6, 1.0),
    (5, 7, 1.0),
    (6, 7, 2.0),
    (7, 8, 3.0),
];

/// Six nodes, seven roads (distances in metres), see [`SIX_NODE_EDGES`]
pub fn six_nodes() -> RoadGraph {
    small_graph(&SIX_NODE_EDGES, &[])
}

/// Jittered lattice with random speeds, oneways, feature bits, border
/// crossings and vehicle restrictions. Deterministic per seed.
pub fn random_network(seed: u64, side: u32) -> RoadGraph {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut b = GraphBuilder::new();
    let step = 120.0 * LAT_PER_M;
    for r in 0..side {
        for c in 0..side {
            let jitter_lat = rng.random_range(-0.2..0.2) * step;
            let jitter_lon = rng.random_range(-0.2..0.2) * step;
            b.node(
                50.0 + r as f64 * step + jitter_lat,
                4.0 + c as f64 * step * 1.556 + jitter_lon,
            );
        }
    }

    let mut pairs = Vec::new();
    for r in 0..side {
        for c in 0..side {
            let n = r * side + c;
            if c + 1 < side {
                pairs.push((n, n + 1));
            }
            if r + 1 < side {
                pairs.push((n, n + side));
            }
            if c + 1 < side && r + 1 < side && rng.random_bool(0.2) {
                pairs.push((n, n + side + 1));
            }
        }
    }

    for (a, c) in pairs {
        if rng.random_bool(0.1) {
            continue;
        }
        let distance = rng.random_range(60.0..240.0);
        let speed = rng.random_range(20.0..110.0);
        let (from, to) = if rng.random_bool(0.5) { (a, c) } else { (c, a) };
        let mut edge = Edge::new(from, to, distance, speed);
        if rng.random_bool(0.15) {
            edge = edge.oneway();
        }
        if rng.random_bool(0.15) {
            let bits = [features::FERRIES, features::TOLLWAYS, features::HIGHWAYS];
            edge = edge.with_features(bits[rng.random_range(0..bits.len())]);
        }
        let id = b.edge(edge);

        if rng.random_bool(0.08) {
            let from_country = rng.random_range(1..4u16);
            b.storage_mut().borders.insert(
                id,
                BorderCrossing {
                    from_country,
                    to_country: from_country + 1,
                },
            );
        }
        if rng.random_bool(0.08) {
            b.storage_mut().vehicle_restrictions.insert(
                id,
                VehicleRestriction {
                    forbidden: if rng.random_bool(0.5) { 1 << 1 } else { 0 },
                    max_height: Some(rng.random_range(2.5..4.5)),
                    max_weight: None,
                },
            );
        }
    }
    b.build().expect("random network is valid")
}

/// Every node pair of a graph with `n` nodes
pub fn all_pairs(n: usize) -> impl Iterator<Item = (NodeId, NodeId)> {
    let n = n as NodeId;
    (0..n).flat_map(move |s| (0..n).map(move |t| (s, t)))
}
