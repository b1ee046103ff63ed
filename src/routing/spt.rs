//! Shortest-path-tree arena
//!
//! Entries are appended on every label improvement and never removed; each
//! points at its parent by index, and a root points at itself. The node index
//! always refers to the best entry seen so far for that node.

use rustc_hash::FxHashMap;

use crate::graph::{EdgeId, NodeId, Weight};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SptEntry {
    pub node: NodeId,
    /// Edge reaching `node` from the parent, `None` at a root
    pub edge: Option<EdgeId>,
    pub weight: Weight,
    /// Deciseconds
    pub duration: Weight,
    /// Metres
    pub distance: f64,
    pub parent: usize,
}

impl SptEntry {
    pub fn is_root(&self, index: usize) -> bool {
        self.parent == index
    }
}

#[derive(Debug, Clone, Default)]
pub struct Spt {
    entries: Vec<SptEntry>,
    best: FxHashMap<NodeId, usize>,
}

impl Spt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a root with the given initial label
    pub fn add_root(&mut self, node: NodeId, weight: Weight, duration: Weight, distance: f64) -> usize {
        let index = self.entries.len();
        self.entries.push(SptEntry {
            node,
            edge: None,
            weight,
            duration,
            distance,
            parent: index,
        });
        self.best.insert(node, index);
        index
    }

    /// Record a new best label for `entry.node`
    pub fn push(&mut self, entry: SptEntry) -> usize {
        let index = self.entries.len();
        self.best.insert(entry.node, index);
        self.entries.push(entry);
        index
    }

    pub fn entry(&self, index: usize) -> &SptEntry {
        &self.entries[index]
    }

    pub fn index_of(&self, node: NodeId) -> Option<usize> {
        self.best.get(&node).copied()
    }

    /// Best entry for `node`
    pub fn get(&self, node: NodeId) -> Option<&SptEntry> {
        self.index_of(node).map(|i| &self.entries[i])
    }

    pub fn weight(&self, node: NodeId) -> Option<Weight> {
        self.get(node).map(|e| e.weight)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.best.contains_key(&node)
    }

    /// Number of labelled nodes
    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    /// Best entry per labelled node
    pub fn nodes(&self) -> impl Iterator<Item = &SptEntry> + '_ {
        self.best.values().map(|&i| &self.entries[i])
    }

    /// `(node, edge)` pairs from the root down to `index`. The root's edge is `None`.
    pub fn trace(&self, index: usize) -> Vec<(NodeId, Option<EdgeId>)> {
        let mut out = Vec::new();
        let mut i = index;
        loop {
            let e = &self.entries[i];
            out.push((e.node, e.edge));
            if e.is_root(i) {
                break;
            }
            i = e.parent;
        }
        out.reverse();
        out
    }
}
