//! Shortcut unpacking - expand shortcuts into original edges

use crate::graph::{EdgeId, NodeId, RoadGraph};

/// Original edges behind `id` in travel order when it is entered from `from`
pub fn unpack_edge(graph: &RoadGraph, id: EdgeId, from: NodeId, out: &mut Vec<EdgeId>) {
    let mut stack = vec![(id, from)];
    while let Some((id, from)) = stack.pop() {
        let edge = graph.edge(id);
        let Some(sc) = edge.shortcut else {
            out.push(id);
            continue;
        };
        let (first, second) = if from == edge.base {
            ((sc.skipped[0], from), (sc.skipped[1], sc.via))
        } else {
            ((sc.skipped[1], from), (sc.skipped[0], sc.via))
        };
        tracing::trace!(shortcut = id, via = sc.via, "unpacking shortcut");
        // LIFO: second half is handled after the first
        stack.push(second);
        stack.push(first);
    }
}

/// Expand a walk over possibly shortcut edges starting at `source` into the
/// visited node sequence and original edge ids
pub fn unpack_path(graph: &RoadGraph, source: NodeId, edges: &[EdgeId]) -> (Vec<NodeId>, Vec<EdgeId>) {
    let mut originals = Vec::with_capacity(edges.len());
    let mut current = source;
    for &id in edges {
        unpack_edge(graph, id, current, &mut originals);
        current = graph.other_node(id, current);
    }

    let mut nodes = Vec::with_capacity(originals.len() + 1);
    nodes.push(source);
    let mut current = source;
    for &id in &originals {
        current = graph.other_node(id, current);
        nodes.push(current);
    }
    (nodes, originals)
}
