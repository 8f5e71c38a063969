//! In-process knowledge graph using petgraph.
//!
//! Merges every element stored during the process lifetime so callers can
//! report aggregate graph size without touching the per-run databases.

use std::collections::HashMap;

use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::debug;

use crate::types::{GraphElement, GraphStats, Node};
use crate::GraphSink;
use chronos_core::Result;

/// Edge payload: relationship type plus optional timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub rel_type: String,
    pub timestamp: Option<String>,
}

pub struct GraphBackend {
    graph: DiGraph<Node, GraphEdge>,
    node_index: HashMap<String, NodeIndex>,
}

impl GraphBackend {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            node_index: HashMap::new(),
        }
    }

    fn ensure_node(&mut self, node: &Node) -> (NodeIndex, bool) {
        if let Some(&idx) = self.node_index.get(&node.id) {
            return (idx, false);
        }
        let idx = self.graph.add_node(node.clone());
        self.node_index.insert(node.id.clone(), idx);
        (idx, true)
    }

    /// Merge an element. Known node ids and identical edges are skipped.
    pub fn merge(&mut self, element: &GraphElement) -> GraphStats {
        let mut added = GraphStats::default();
        for node in &element.nodes {
            if self.ensure_node(node).1 {
                added.node_count += 1;
            }
        }
        for rel in &element.relationships {
            let (subj, new_subj) = self.ensure_node(&rel.subject);
            let (obj, new_obj) = self.ensure_node(&rel.object);
            added.node_count += new_subj as usize + new_obj as usize;

            let exists = self
                .graph
                .edges_connecting(subj, obj)
                .any(|e| e.weight().rel_type == rel.rel_type);
            if !exists {
                self.graph.add_edge(
                    subj,
                    obj,
                    GraphEdge {
                        rel_type: rel.rel_type.clone(),
                        timestamp: rel.timestamp.clone(),
                    },
                );
                added.relationship_count += 1;
            }
        }
        debug!(
            "Merged graph element: +{} nodes, +{} edges",
            added.node_count, added.relationship_count
        );
        added
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.graph.node_count(),
            relationship_count: self.graph.edge_count(),
        }
    }
}

impl Default for GraphBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle used as a graph sink.
pub type SharedGraph = RwLock<GraphBackend>;

impl GraphSink for SharedGraph {
    fn store(&self, element: &GraphElement) -> Result<()> {
        self.write().merge(element);
        Ok(())
    }
}
