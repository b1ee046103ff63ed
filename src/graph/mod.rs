//! Road graph accessor
//!
//! Nodes carry WGS84 coordinates; edges are stored once with forward/backward
//! access bits and are traversed through a CSR list of incident edges per node.
//! Shortcuts created by contraction are appended after the original edges and
//! keep the same id space.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod io;
pub mod spatial;
pub mod storage;

pub use spatial::NodeLocator;
pub use storage::{BorderCrossing, SideStorage, SpeedProfile, VehicleClass, VehicleRestriction};

pub type NodeId = u32;
pub type EdgeId = u32;

/// Integer edge cost. Deciseconds for time-based weightings, decimetres for
/// distance-based ones.
pub type Weight = u32;

/// Unreachable / not traversable
pub const INFINITE: Weight = u32::MAX;

/// Traversal direction relative to a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Feature category bits carried on edges (avoid-features filter)
pub mod features {
    pub const HIGHWAYS: u32 = 1;
    pub const TOLLWAYS: u32 = 1 << 1;
    pub const FERRIES: u32 = 1 << 2;
    pub const STEPS: u32 = 1 << 3;
    pub const FORDS: u32 = 1 << 4;
    pub const TUNNELS: u32 = 1 << 5;

    pub const ALL: u32 = HIGHWAYS | TOLLWAYS | FERRIES | STEPS | FORDS | TUNNELS;

    pub fn from_name(name: &str) -> Option<u32> {
        match name.trim().to_ascii_lowercase().as_str() {
            "highways" => Some(HIGHWAYS),
            "tollways" => Some(TOLLWAYS),
            "ferries" => Some(FERRIES),
            "steps" => Some(STEPS),
            "fords" => Some(FORDS),
            "tunnels" => Some(TUNNELS),
            _ => None,
        }
    }

    /// Parse a comma separated list ("tollways,ferries") into a mask
    pub fn parse_list(list: &str) -> Option<u32> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .try_fold(0u32, |mask, name| from_name(name).map(|bit| mask | bit))
    }
}

/// A skipped two-edge path. `skipped[0]` joins the shortcut's base node to the
/// contracted node, `skipped[1]` joins the contracted node to the adjacent node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortcut {
    pub weight: Weight,
    /// Deciseconds
    pub duration: Weight,
    pub skipped: [EdgeId; 2],
    /// Node bypassed by this shortcut
    pub via: NodeId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub base: NodeId,
    pub adj: NodeId,
    /// Metres
    pub distance: f64,
    #[serde(default)]
    pub speed_kmh: f64,
    /// Traversable base -> adj
    pub forward: bool,
    /// Traversable adj -> base
    pub backward: bool,
    /// Feature category bits, see [`features`]
    #[serde(default)]
    pub features: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<Shortcut>,
}

impl Edge {
    pub fn new(base: NodeId, adj: NodeId, distance: f64, speed_kmh: f64) -> Self {
        Self {
            base,
            adj,
            distance,
            speed_kmh,
            forward: true,
            backward: true,
            features: 0,
            shortcut: None,
        }
    }

    pub fn oneway(mut self) -> Self {
        self.backward = false;
        self
    }

    pub fn with_features(mut self, features: u32) -> Self {
        self.features = features;
        self
    }

    pub fn is_shortcut(&self) -> bool {
        self.shortcut.is_some()
    }

    /// Stored orientation of a traversal that leaves `node`
    pub fn orientation_from(&self, node: NodeId) -> Direction {
        if node == self.base {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    /// The endpoint opposite to `node`
    pub fn other(&self, node: NodeId) -> NodeId {
        if node == self.base {
            self.adj
        } else {
            self.base
        }
    }
}

/// An edge seen from one of its endpoints
#[derive(Debug, Clone, Copy)]
pub struct EdgeCursor<'a> {
    pub id: EdgeId,
    pub edge: &'a Edge,
    pub from: NodeId,
    pub to: NodeId,
}

impl<'a> EdgeCursor<'a> {
    /// `from -> to` runs against the stored orientation
    pub fn is_reversed(&self) -> bool {
        self.edge.base != self.from
    }

    /// Stored orientation of the travel a search in `direction` makes over
    /// this edge: `from -> to` forwards, `to -> from` backwards
    pub fn travel_orientation(&self, direction: Direction) -> Direction {
        match direction {
            Direction::Forward => self.edge.orientation_from(self.from),
            Direction::Backward => self.edge.orientation_from(self.to),
        }
    }

    /// Travel `from -> to` is allowed
    pub fn is_outgoing(&self) -> bool {
        if self.is_reversed() {
            self.edge.backward
        } else {
            self.edge.forward
        }
    }

    /// Travel `to -> from` is allowed
    pub fn is_incoming(&self) -> bool {
        if self.is_reversed() {
            self.edge.forward
        } else {
            self.edge.backward
        }
    }

    /// Whether a search running in `direction` may use this edge out of `from`
    pub fn allows(&self, direction: Direction) -> bool {
        match direction {
            Direction::Forward => self.is_outgoing(),
            Direction::Backward => self.is_incoming(),
        }
    }
}

/// CSR list of incident edge ids per node
#[derive(Debug, Clone, Default)]
struct Adjacency {
    offsets: Vec<u32>,
    entries: Vec<EdgeId>,
}

impl Adjacency {
    fn build(n_nodes: usize, edges: &[Edge]) -> Self {
        let mut degree = vec![0u32; n_nodes + 1];
        for edge in edges {
            degree[edge.base as usize] += 1;
            if edge.adj != edge.base {
                degree[edge.adj as usize] += 1;
            }
        }

        let mut offsets = vec![0u32; n_nodes + 1];
        for n in 0..n_nodes {
            offsets[n + 1] = offsets[n] + degree[n];
        }

        let mut fill = offsets.clone();
        let mut entries = vec![0; offsets[n_nodes] as usize];
        for (id, edge) in edges.iter().enumerate() {
            let slot = &mut fill[edge.base as usize];
            entries[*slot as usize] = id as EdgeId;
            *slot += 1;
            if edge.adj != edge.base {
                let slot = &mut fill[edge.adj as usize];
                entries[*slot as usize] = id as EdgeId;
                *slot += 1;
            }
        }

        Self { offsets, entries }
    }

    fn of(&self, node: NodeId) -> &[EdgeId] {
        let start = self.offsets[node as usize] as usize;
        let end = self.offsets[node as usize + 1] as usize;
        &self.entries[start..end]
    }
}

/// Read-only road graph plus side storage
#[derive(Debug, Clone)]
pub struct RoadGraph {
    coords: Vec<Coordinate>,
    edges: Vec<Edge>,
    n_original_edges: usize,
    adjacency: Adjacency,
    storage: SideStorage,
}

impl RoadGraph {
    /// Validate and index a graph. Shortcuts are rejected here: they only
    /// enter a graph through [`RoadGraph::append_shortcuts`].
    pub fn new(coords: Vec<Coordinate>, edges: Vec<Edge>, storage: SideStorage) -> Result<Self> {
        let n = coords.len();
        if n > NodeId::MAX as usize || edges.len() > EdgeId::MAX as usize {
            return Err(Error::InvalidGraph("graph too large for 32-bit ids".into()));
        }
        for (id, edge) in edges.iter().enumerate() {
            if edge.base as usize >= n || edge.adj as usize >= n {
                return Err(Error::InvalidGraph(format!(
                    "edge {} references node {} / {} but graph has {} nodes",
                    id, edge.base, edge.adj, n
                )));
            }
            if !edge.distance.is_finite() || edge.distance < 0.0 {
                return Err(Error::InvalidGraph(format!(
                    "edge {} has invalid distance {}",
                    id, edge.distance
                )));
            }
            if !edge.speed_kmh.is_finite() || edge.speed_kmh < 0.0 {
                return Err(Error::InvalidGraph(format!(
                    "edge {} has invalid speed {}",
                    id, edge.speed_kmh
                )));
            }
            if edge.is_shortcut() {
                return Err(Error::InvalidGraph(format!(
                    "edge {} is a shortcut; shortcuts are created by preprocessing only",
                    id
                )));
            }
        }
        storage.validate(edges.len())?;

        let adjacency = Adjacency::build(n, &edges);
        Ok(Self {
            n_original_edges: edges.len(),
            coords,
            edges,
            adjacency,
            storage,
        })
    }

    /// Append contraction shortcuts and rebuild adjacency. Ids of existing
    /// edges do not change.
    pub(crate) fn append_shortcuts(&mut self, shortcuts: Vec<Edge>) {
        self.edges.extend(shortcuts);
        self.adjacency = Adjacency::build(self.coords.len(), &self.edges);
    }

    pub fn node_count(&self) -> usize {
        self.coords.len()
    }

    /// All edges including shortcuts
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn original_edge_count(&self) -> usize {
        self.n_original_edges
    }

    pub fn shortcut_count(&self) -> usize {
        self.edges.len() - self.n_original_edges
    }

    pub fn coordinate(&self, node: NodeId) -> Coordinate {
        self.coords[node as usize]
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        &self.coords
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id as usize]
    }

    pub fn edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges.iter().enumerate().map(|(i, e)| (i as EdgeId, e))
    }

    pub fn original_edges(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges().take(self.n_original_edges)
    }

    pub fn shortcuts(&self) -> impl Iterator<Item = (EdgeId, &Edge)> {
        self.edges().skip(self.n_original_edges)
    }

    pub fn storage(&self) -> &SideStorage {
        &self.storage
    }

    /// Incident edges of `node`, oriented away from it
    pub fn edges_of(&self, node: NodeId) -> impl Iterator<Item = EdgeCursor<'_>> + '_ {
        self.adjacency.of(node).iter().map(move |&id| {
            let edge = &self.edges[id as usize];
            EdgeCursor {
                id,
                edge,
                from: node,
                to: edge.other(node),
            }
        })
    }

    pub fn degree(&self, node: NodeId) -> usize {
        self.adjacency.of(node).len()
    }

    /// Endpoint of `edge` reached when leaving `from`
    pub fn other_node(&self, edge: EdgeId, from: NodeId) -> NodeId {
        self.edges[edge as usize].other(from)
    }
}

/// Incremental graph construction, mostly for tests and the JSON loader
#[derive(Debug, Default)]
pub struct GraphBuilder {
    coords: Vec<Coordinate>,
    edges: Vec<Edge>,
    storage: SideStorage,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&mut self, lat: f64, lon: f64) -> NodeId {
        self.coords.push(Coordinate::new(lat, lon));
        (self.coords.len() - 1) as NodeId
    }

    pub fn edge(&mut self, edge: Edge) -> EdgeId {
        self.edges.push(edge);
        (self.edges.len() - 1) as EdgeId
    }

    /// Bidirectional edge with the distance given in metres
    pub fn road(&mut self, a: NodeId, b: NodeId, distance: f64, speed_kmh: f64) -> EdgeId {
        self.edge(Edge::new(a, b, distance, speed_kmh))
    }

    pub fn storage_mut(&mut self) -> &mut SideStorage {
        &mut self.storage
    }

    pub fn build(self) -> Result<RoadGraph> {
        RoadGraph::new(self.coords, self.edges, self.storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> RoadGraph {
        let mut b = GraphBuilder::new();
        let n0 = b.node(50.0, 4.0);
        let n1 = b.node(50.0, 4.001);
        let n2 = b.node(50.001, 4.0);
        b.road(n0, n1, 70.0, 50.0);
        b.edge(Edge::new(n1, n2, 130.0, 50.0).oneway());
        b.road(n2, n0, 110.0, 50.0);
        b.build().unwrap()
    }

    #[test]
    fn test_incident_edges_and_orientation() {
        let g = triangle();
        assert_eq!(g.degree(1), 2);

        let from_two: Vec<_> = g.edges_of(2).collect();
        let to_one = from_two.iter().find(|c| c.to == 1).unwrap();
        assert!(to_one.is_reversed());
        assert!(!to_one.is_outgoing(), "oneway 1->2 cannot be driven from 2");
        assert!(to_one.is_incoming());
        assert!(to_one.allows(Direction::Backward));
    }

    #[test]
    fn test_rejects_dangling_edges() {
        let mut b = GraphBuilder::new();
        b.node(0.0, 0.0);
        b.road(0, 5, 10.0, 30.0);
        assert!(matches!(b.build(), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn test_feature_names() {
        assert_eq!(
            features::parse_list("tollways, ferries"),
            Some(features::TOLLWAYS | features::FERRIES)
        );
        assert_eq!(features::parse_list("motorways"), None);
        assert_eq!(features::parse_list(""), Some(0));
    }
}
