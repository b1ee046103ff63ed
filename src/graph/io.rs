//! JSON graph file
//!
//! A serde dump of the in-memory model: node coordinates, original edges and
//! side storage. Shortcuts are never written; they are rebuilt by preparation.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{Coordinate, Edge, RoadGraph, SideStorage};
use crate::error::Result;

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphFile {
    pub nodes: Vec<Coordinate>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub storage: SideStorage,
}

impl GraphFile {
    pub fn read(path: &Path) -> Result<RoadGraph> {
        let reader = BufReader::new(File::open(path)?);
        let file: GraphFile = serde_json::from_reader(reader)?;
        file.into_graph()
    }

    pub fn write(graph: &RoadGraph, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, &Self::from_graph(graph))?;
        Ok(())
    }

    pub fn from_graph(graph: &RoadGraph) -> Self {
        Self {
            nodes: graph.coordinates().to_vec(),
            edges: graph.original_edges().map(|(_, e)| e.clone()).collect(),
            storage: graph.storage().clone(),
        }
    }

    pub fn into_graph(self) -> Result<RoadGraph> {
        RoadGraph::new(self.nodes, self.edges, self.storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{BorderCrossing, GraphBuilder};

    #[test]
    fn test_file_keeps_side_storage() {
        let mut b = GraphBuilder::new();
        let a = b.node(50.0, 4.0);
        let c = b.node(50.0, 4.01);
        let e = b.road(a, c, 700.0, 80.0);
        b.storage_mut().borders.insert(
            e,
            BorderCrossing {
                from_country: 21,
                to_country: 56,
            },
        );
        let graph = b.build().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        GraphFile::write(&graph, &path).unwrap();
        let loaded = GraphFile::read(&path).unwrap();

        assert_eq!(loaded.node_count(), 2);
        assert_eq!(loaded.edge(0).distance, 700.0);
        assert_eq!(loaded.storage().border(e).unwrap().to_country, 56);
    }

    #[test]
    fn test_minimal_json() {
        let json = r#"{
            "nodes": [{"lat": 0.0, "lon": 0.0}, {"lat": 0.0, "lon": 0.001}],
            "edges": [{"base": 0, "adj": 1, "distance": 111.0, "forward": true, "backward": false}]
        }"#;
        let file: GraphFile = serde_json::from_str(json).unwrap();
        let graph = file.into_graph().unwrap();
        assert!(!graph.edge(0).backward);
        assert_eq!(graph.edge(0).features, 0);
    }
}
