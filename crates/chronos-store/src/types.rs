//! Graph and artifact data types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ordered key/value properties attached to nodes and relationships.
pub type Properties = BTreeMap<String, String>;

/// A typed entity. Identity is the `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub properties: Properties,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A typed directed edge between two nodes of the same element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub subject: Node,
    pub object: Node,
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub properties: Properties,
}

/// Knowledge extracted from one Stage2 answer.
///
/// Every relationship endpoint is present in `nodes`; the extractor only
/// builds elements that satisfy this.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphElement {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
    /// Truncated upstream text the element was extracted from.
    pub source: String,
}

impl GraphElement {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.nodes.len(),
            relationship_count: self.relationships.len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    #[serde(rename = "nodeCount")]
    pub node_count: usize,
    #[serde(rename = "relationshipCount")]
    pub relationship_count: usize,
}

/// Metadata written next to every stage artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub stage: String,
    pub step: String,
    #[serde(rename = "inputLength")]
    pub input_length: usize,
    #[serde(rename = "outputLength")]
    pub output_length: usize,
    pub timestamp: DateTime<Utc>,
    pub sha256: String,
}

/// One artifact to persist.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactWrite<'a> {
    pub run_id: &'a str,
    pub stage: &'a str,
    pub step: &'a str,
    pub input_length: usize,
    pub output: &'a str,
}
