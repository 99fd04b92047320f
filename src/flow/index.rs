/// Adjacency indices over a flow graph
///
/// Built once per invocation in O(nodes + edges) and borrowed by the runner.
/// Edges pointing at or coming from ids that are not in the node list stay in
/// the indices; looking the missing id up simply yields nothing.

use crate::flow::types::{Edge, FlowGraph, Node, HANDLE_OUT};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct GraphIndex<'g> {
    graph: &'g FlowGraph,
    nodes_by_id: HashMap<&'g str, &'g Node>,
    out_edges: HashMap<&'g str, Vec<&'g Edge>>,
    in_edges: HashMap<&'g str, Vec<&'g Edge>>,
}

impl<'g> GraphIndex<'g> {
    pub fn build(graph: &'g FlowGraph) -> Self {
        let mut nodes_by_id = HashMap::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            // First declaration wins on duplicate ids
            nodes_by_id.entry(node.id.as_str()).or_insert(node);
        }

        let mut out_edges: HashMap<&str, Vec<&Edge>> = HashMap::new();
        let mut in_edges: HashMap<&str, Vec<&Edge>> = HashMap::new();
        for edge in &graph.edges {
            out_edges.entry(edge.source.as_str()).or_default().push(edge);
            in_edges.entry(edge.target.as_str()).or_default().push(edge);
        }

        Self {
            graph,
            nodes_by_id,
            out_edges,
            in_edges,
        }
    }

    pub fn graph(&self) -> &'g FlowGraph {
        self.graph
    }

    pub fn node(&self, id: &str) -> Option<&'g Node> {
        self.nodes_by_id.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes_by_id.contains_key(id)
    }

    /// Outgoing edges of a node in declaration order
    pub fn outgoing(&self, id: &str) -> &[&'g Edge] {
        self.out_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Incoming edges of a node in declaration order
    pub fn incoming(&self, id: &str) -> &[&'g Edge] {
        self.in_edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes with no incoming edge, in declaration order and without duplicates
    pub fn start_nodes(&self) -> Vec<&'g Node> {
        let mut seen = HashSet::new();
        self.graph
            .nodes
            .iter()
            .filter(|node| self.incoming(&node.id).is_empty())
            .filter(|node| seen.insert(node.id.as_str()))
            .collect()
    }

    /// Pick the edge to follow for an outcome handle
    ///
    /// The first edge labeled with `handle` wins. The default `out` handle also
    /// accepts the first unlabeled edge; labeled edges such as `true`/`false`
    /// are never taken by `out`.
    pub fn select_edge(&self, node_id: &str, handle: &str) -> Option<&'g Edge> {
        let outgoing = self.outgoing(node_id);
        outgoing
            .iter()
            .find(|edge| edge.source_handle.as_deref() == Some(handle))
            .or_else(|| {
                if handle == HANDLE_OUT {
                    outgoing.iter().find(|edge| edge.source_handle.is_none())
                } else {
                    None
                }
            })
            .copied()
    }

    /// Edges whose source or target is not a declared node
    pub fn dangling_edges(&self) -> impl Iterator<Item = &'g Edge> + '_ {
        self.graph
            .edges
            .iter()
            .filter(move |edge| !self.contains(&edge.source) || !self.contains(&edge.target))
    }
}
