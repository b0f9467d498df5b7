use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use codeboard_core::NodeKind;

/// A code entity in the call graph. Lines are 0-based as reported by the
/// language-server builder; conversion to 1-based happens at resolution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub qualified_name: String,
    pub node_type: NodeKind,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
}

impl Node {
    pub fn new(
        qualified_name: impl Into<String>,
        node_type: NodeKind,
        file_path: impl Into<String>,
        line_start: u32,
        line_end: u32,
    ) -> Self {
        Self {
            qualified_name: qualified_name.into(),
            node_type,
            file_path: file_path.into(),
            line_start,
            line_end,
        }
    }

    /// True when this node lives in `file`, tolerating an absolute prefix on
    /// the node side (the builder records absolute paths, manifests relative).
    pub fn is_in_file(&self, file: &str) -> bool {
        let own = self.file_path.replace('\\', "/");
        let other = codeboard_core::normalize_path(file);
        own == other || own.ends_with(&format!("/{other}")) || other.ends_with(&format!("/{own}"))
    }
}

/// Serialized shape of a call graph: node list plus qualified-name edge pairs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CallGraphData {
    nodes: Vec<Node>,
    edges: Vec<(String, String)>,
}

/// Directed call graph, edges from caller to callee.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "CallGraphData", into = "CallGraphData")]
pub struct CallGraph {
    graph: DiGraph<Node, ()>,
    index: HashMap<String, NodeIndex>,
}

impl PartialEq for CallGraph {
    fn eq(&self, other: &Self) -> bool {
        let mut self_nodes: Vec<&Node> = self.nodes().collect();
        let mut other_nodes: Vec<&Node> = other.nodes().collect();
        self_nodes.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));
        other_nodes.sort_by(|a, b| a.qualified_name.cmp(&b.qualified_name));

        let mut self_edges = self.edges();
        let mut other_edges = other.edges();
        self_edges.sort();
        other_edges.sort();

        self_nodes == other_nodes && self_edges == other_edges
    }
}

impl CallGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Add a node, keeping the first definition on duplicate qualified names.
    pub fn add_node(&mut self, node: Node) -> NodeIndex {
        if let Some(&idx) = self.index.get(&node.qualified_name) {
            return idx;
        }
        let qualified_name = node.qualified_name.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(qualified_name, idx);
        idx
    }

    /// Add a caller → callee edge. Both endpoints must already be nodes.
    pub fn add_edge(&mut self, source: &str, destination: &str) -> Result<()> {
        let (Some(&src), Some(&dst)) = (self.index.get(source), self.index.get(destination))
        else {
            bail!("edge endpoints must be existing nodes: {source} -> {destination}");
        };
        if self.graph.find_edge(src, dst).is_none() {
            self.graph.add_edge(src, dst, ());
        }
        Ok(())
    }

    pub fn contains(&self, qualified_name: &str) -> bool {
        self.index.contains_key(qualified_name)
    }

    pub fn node(&self, qualified_name: &str) -> Option<&Node> {
        self.index.get(qualified_name).map(|&idx| &self.graph[idx])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// All edges as `(caller, callee)` qualified-name pairs.
    pub fn edges(&self) -> Vec<(&str, &str)> {
        self.graph
            .edge_references()
            .map(|e| {
                (
                    self.graph[e.source()].qualified_name.as_str(),
                    self.graph[e.target()].qualified_name.as_str(),
                )
            })
            .collect()
    }

    /// Qualified names adjacent to `qualified_name` in either direction.
    pub fn neighbors(&self, qualified_name: &str) -> Vec<&str> {
        let Some(&idx) = self.index.get(qualified_name) else {
            return Vec::new();
        };
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for direction in [petgraph::Direction::Outgoing, petgraph::Direction::Incoming] {
            for neighbor in self.graph.neighbors_directed(idx, direction) {
                let name = self.graph[neighbor].qualified_name.as_str();
                if seen.insert(name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Nodes whose recorded file matches `file` (suffix-tolerant).
    pub fn nodes_in_file(&self, file: &str) -> Vec<&Node> {
        self.nodes().filter(|n| n.is_in_file(file)).collect()
    }

    /// Merge nodes and edges from `other`, keeping existing definitions.
    pub fn merge(&mut self, other: &CallGraph) {
        for node in other.nodes() {
            self.add_node(node.clone());
        }
        for (src, dst) in other.edges() {
            // Both endpoints were just added; an error here is impossible.
            let _ = self.add_edge(src, dst);
        }
    }

    /// Restrict the graph to nodes that live in one of `files`, keeping edges
    /// whose endpoints both survive. Used to cluster a component's subgraph.
    pub fn filter_by_files(&self, files: &HashSet<String>) -> CallGraph {
        let mut filtered = CallGraph::new();
        for node in self.nodes() {
            if files.iter().any(|f| node.is_in_file(f)) {
                filtered.add_node(node.clone());
            }
        }
        for (src, dst) in self.edges() {
            if filtered.contains(src) && filtered.contains(dst) {
                let _ = filtered.add_edge(src, dst);
            }
        }
        filtered
    }
}

impl From<CallGraphData> for CallGraph {
    fn from(data: CallGraphData) -> Self {
        let mut graph = CallGraph::new();
        for node in data.nodes {
            graph.add_node(node);
        }
        for (src, dst) in data.edges {
            let _ = graph.add_edge(&src, &dst);
        }
        graph
    }
}

impl From<CallGraph> for CallGraphData {
    fn from(graph: CallGraph) -> Self {
        let edges = graph
            .edges()
            .into_iter()
            .map(|(s, d)| (s.to_string(), d.to_string()))
            .collect();
        CallGraphData {
            nodes: graph.nodes().cloned().collect(),
            edges,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_node(qname: &str, file: &str) -> Node {
        Node::new(qname, NodeKind::Function, file, 0, 10)
    }

    #[test]
    fn test_add_node_and_edge() {
        let mut graph = CallGraph::new();
        graph.add_node(make_node("a.main", "a.py"));
        graph.add_node(make_node("b.helper", "b.py"));
        graph.add_edge("a.main", "b.helper").unwrap();

        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edges(), vec![("a.main", "b.helper")]);
    }

    #[test]
    fn test_duplicate_nodes_and_edges_are_ignored() {
        let mut graph = CallGraph::new();
        graph.add_node(make_node("a.main", "a.py"));
        graph.add_node(make_node("a.main", "other.py"));
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.node("a.main").unwrap().file_path, "a.py");

        graph.add_node(make_node("b.helper", "b.py"));
        graph.add_edge("a.main", "b.helper").unwrap();
        graph.add_edge("a.main", "b.helper").unwrap();
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_edge_requires_existing_endpoints() {
        let mut graph = CallGraph::new();
        graph.add_node(make_node("a.main", "a.py"));
        assert!(graph.add_edge("a.main", "missing").is_err());
    }

    #[test]
    fn test_nodes_in_file_tolerates_absolute_prefix() {
        let mut graph = CallGraph::new();
        graph.add_node(make_node("a.main", "/repo/checkout/pkg/a.py"));
        graph.add_node(make_node("b.main", "/repo/checkout/pkg/b.py"));

        let found = graph.nodes_in_file("pkg/a.py");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].qualified_name, "a.main");
    }

    #[test]
    fn test_filter_by_files_keeps_internal_edges() {
        let mut graph = CallGraph::new();
        graph.add_node(make_node("a.one", "pkg/a.py"));
        graph.add_node(make_node("a.two", "pkg/a.py"));
        graph.add_node(make_node("b.out", "other/b.py"));
        graph.add_edge("a.one", "a.two").unwrap();
        graph.add_edge("a.one", "b.out").unwrap();

        let files: HashSet<String> = ["pkg/a.py".to_string()].into_iter().collect();
        let sub = graph.filter_by_files(&files);
        assert_eq!(sub.node_count(), 2);
        assert_eq!(sub.edge_count(), 1);
        assert!(!sub.contains("b.out"));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut graph = CallGraph::new();
        graph.add_node(make_node("a.main", "a.py"));
        graph.add_node(make_node("b.helper", "b.py"));
        graph.add_edge("a.main", "b.helper").unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let back: CallGraph = serde_json::from_str(&json).unwrap();
        assert_eq!(back.node_count(), 2);
        assert_eq!(back.edges(), vec![("a.main", "b.helper")]);
    }
}
