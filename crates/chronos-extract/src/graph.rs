//! Free text to typed knowledge graph.
//!
//! Two input forms are accepted. A versioned JSON payload
//! (`"schema": "chronos.graph/v1"`, bare or inside a ```json fence) is
//! validated and used when present. Otherwise the text is scanned for the
//! `Node(id='..', type='..')` / `Relationship(subj=.., obj=.., type='..')`
//! grammar. Both paths share the same rules: first declaration of an id wins,
//! relationships whose endpoints are not declared nodes are dropped, and the
//! result depends only on the input text.

use std::collections::HashMap;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use chronos_store::{GraphElement, Node, Properties, Relationship};

pub const GRAPH_SCHEMA_V1: &str = "chronos.graph/v1";

/// Upper bound on the provenance text kept on an element, in characters.
pub const MAX_SOURCE_CHARS: usize = 1000;

/// Characters taken from each upstream artifact for the provenance text.
const SNIPPET_CHARS: usize = 500;

static NODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Node\(\s*id\s*=\s*'(.*?)'\s*,\s*type\s*=\s*'(.*?)'\s*\)").expect("node pattern")
});

static RELATIONSHIP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"Relationship\(\s*",
        r"subj\s*=\s*Node\(\s*id\s*=\s*'(.*?)'\s*,\s*type\s*=\s*'(.*?)'\s*\)\s*,\s*",
        r"obj\s*=\s*Node\(\s*id\s*=\s*'(.*?)'\s*,\s*type\s*=\s*'(.*?)'\s*\)\s*,\s*",
        r"type\s*=\s*'(.*?)'\s*",
        r"(?:,\s*timestamp\s*=\s*'(.*?)'\s*)?\)",
    ))
    .expect("relationship pattern")
});

static JSON_FENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("fence pattern"));

#[derive(Debug, Deserialize)]
struct PayloadV1 {
    schema: String,
    #[serde(default)]
    nodes: Vec<PayloadNode>,
    #[serde(default)]
    relationships: Vec<PayloadRelationship>,
}

#[derive(Debug, Deserialize)]
struct PayloadNode {
    id: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    properties: Properties,
}

#[derive(Debug, Deserialize)]
struct PayloadRelationship {
    subject: String,
    object: String,
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(default)]
    timestamp: Option<String>,
}

/// A relationship as written, before endpoint resolution.
struct RawRelationship {
    subject: String,
    object: String,
    rel_type: String,
    timestamp: Option<String>,
}

/// Deterministic graph extractor.
#[derive(Debug, Clone)]
pub struct GraphExtractor {
    pass_tag: String,
}

impl Default for GraphExtractor {
    fn default() -> Self {
        Self::new("stage2")
    }
}

impl GraphExtractor {
    /// `pass_tag` is stored as the `source` property of every node and relationship.
    pub fn new(pass_tag: impl Into<String>) -> Self {
        Self {
            pass_tag: pass_tag.into(),
        }
    }

    /// Parse `text` into a graph element whose provenance is the truncated `source_text`.
    pub fn extract(&self, text: &str, source_text: &str) -> GraphElement {
        let (declared, raw_relationships) = match parse_payload(text) {
            Some(payload) => {
                debug!(
                    "Structured graph payload: {} nodes, {} relationships",
                    payload.nodes.len(),
                    payload.relationships.len()
                );
                payload_parts(payload)
            }
            None => scan_text(text),
        };

        let mut element = GraphElement {
            source: truncate_chars(source_text, MAX_SOURCE_CHARS).to_string(),
            ..Default::default()
        };
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut duplicates = 0usize;

        for (id, node_type, mut properties) in declared {
            if id.is_empty() || index.contains_key(&id) {
                duplicates += 1;
                continue;
            }
            properties.insert("source".into(), self.pass_tag.clone());
            index.insert(id.clone(), element.nodes.len());
            element.nodes.push(Node {
                id,
                node_type,
                properties,
            });
        }

        let mut dropped = 0usize;
        for raw in raw_relationships {
            let (Some(&s), Some(&o)) = (index.get(&raw.subject), index.get(&raw.object)) else {
                dropped += 1;
                continue;
            };
            element.relationships.push(Relationship {
                subject: element.nodes[s].clone(),
                object: element.nodes[o].clone(),
                rel_type: raw.rel_type,
                timestamp: raw.timestamp.filter(|t| !t.is_empty()),
                properties: [("source".to_string(), self.pass_tag.clone())].into(),
            });
        }

        if duplicates > 0 {
            debug!("Ignored {} repeated node declarations", duplicates);
        }
        if dropped > 0 {
            warn!(
                "Dropped {} relationships with undeclared endpoints",
                dropped
            );
        }
        if element.nodes.is_empty() && !text.trim().is_empty() {
            warn!("No graph declarations recognised in {} chars of model output", text.len());
        }

        debug!(
            "Extracted {} nodes and {} relationships",
            element.nodes.len(),
            element.relationships.len()
        );
        element
    }
}

type Declared = Vec<(String, String, Properties)>;

/// Structured payload: fenced blocks tagged with the schema first, then the
/// first object in the text that reads as a v1 payload. Prose around the
/// object is ignored.
fn parse_payload(text: &str) -> Option<PayloadV1> {
    if !text.contains(GRAPH_SCHEMA_V1) {
        return None;
    }

    let fenced = JSON_FENCE_RE
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|body| body.contains(GRAPH_SCHEMA_V1));
    let bare = text.match_indices('{').map(|(i, _)| &text[i..]);

    let mut last_error = None;
    for candidate in fenced.chain(bare) {
        match first_value(candidate.trim_start()) {
            Some(Ok(payload)) if payload.schema == GRAPH_SCHEMA_V1 => return Some(payload),
            Some(Ok(_)) => {}
            Some(Err(e)) => last_error = Some(e),
            None => {}
        }
    }

    if let Some(e) = last_error {
        warn!("Invalid graph payload ({}), scanning text", e);
    }
    None
}

/// Deserialize only the first JSON value, ignoring whatever follows it.
fn first_value(text: &str) -> Option<serde_json::Result<PayloadV1>> {
    serde_json::Deserializer::from_str(text)
        .into_iter::<PayloadV1>()
        .next()
}

fn payload_parts(payload: PayloadV1) -> (Declared, Vec<RawRelationship>) {
    let nodes = payload
        .nodes
        .into_iter()
        .map(|n| (n.id, n.node_type, n.properties))
        .collect();
    let relationships = payload
        .relationships
        .into_iter()
        .map(|r| RawRelationship {
            subject: r.subject,
            object: r.object,
            rel_type: r.rel_type,
            timestamp: r.timestamp,
        })
        .collect();
    (nodes, relationships)
}

/// Grammar scan. Node matches inside a relationship's span are endpoint
/// references, not declarations.
fn scan_text(text: &str) -> (Declared, Vec<RawRelationship>) {
    let mut spans: Vec<Range<usize>> = Vec::new();
    let mut relationships = Vec::new();
    for caps in RELATIONSHIP_RE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        spans.push(whole.range());
        let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string());
        relationships.push(RawRelationship {
            subject: group(1).unwrap_or_default(),
            object: group(3).unwrap_or_default(),
            rel_type: group(5).unwrap_or_default(),
            timestamp: group(6),
        });
    }

    let nodes = NODE_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            if spans.iter().any(|s| s.start <= whole.start() && whole.end() <= s.end) {
                return None;
            }
            Some((
                caps.get(1)?.as_str().to_string(),
                caps.get(2)?.as_str().to_string(),
                Properties::new(),
            ))
        })
        .collect();

    (nodes, relationships)
}

/// Longest prefix of `s` with at most `max_chars` characters.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}

/// Provenance text for a Stage2 element built from the Stage1 brainstorm and
/// the source document, bounded by [`MAX_SOURCE_CHARS`].
pub fn source_snippet(brainstorm: &str, document: &str) -> String {
    let snippet = format!(
        "Stage1: {}... | Source: {}...",
        truncate_chars(brainstorm, SNIPPET_CHARS),
        truncate_chars(document, SNIPPET_CHARS)
    );
    truncate_chars(&snippet, MAX_SOURCE_CHARS).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = "Node(id='blood_congestion', type='ClinicalObservation')\n\
        Node(id='paralysis', type='ClinicalObservation')\n\
        Relationship(subj=Node(id='blood_congestion', type='ClinicalObservation'), \
        obj=Node(id='paralysis', type='ClinicalObservation'), type='results_in')";

    #[test]
    fn test_end_to_end_scenario() {
        let element = GraphExtractor::default().extract(SCENARIO, "source");

        let ids: Vec<&str> = element.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["blood_congestion", "paralysis"]);
        assert_eq!(element.relationships.len(), 1);

        let rel = &element.relationships[0];
        assert_eq!(rel.rel_type, "results_in");
        assert_eq!(rel.subject.id, "blood_congestion");
        assert_eq!(rel.object.id, "paralysis");
        assert!(rel.timestamp.is_none());
        assert_eq!(element.source, "source");
    }

    #[test]
    fn test_first_declaration_wins() {
        let text = "Node(id='a', type='X')\nNode(id='a', type='Y')";
        let element = GraphExtractor::default().extract(text, "");
        assert_eq!(element.nodes.len(), 1);
        assert_eq!(element.nodes[0].node_type, "X");
    }

    #[test]
    fn test_dangling_reference_is_dropped() {
        let text = "Node(id='a', type='X')\n\
            Relationship(subj=Node(id='a', type='X'), obj=Node(id='z', type='X'), type='causes')";
        let element = GraphExtractor::default().extract(text, "");
        assert_eq!(element.nodes.len(), 1);
        assert!(element.node("z").is_none());
        assert!(element.relationships.is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = GraphExtractor::default();
        let first = extractor.extract(SCENARIO, "src");
        let second = extractor.extract(SCENARIO, "src");
        assert_eq!(first, second);
    }

    #[test]
    fn test_relationship_before_declarations_resolves() {
        let text = "Relationship(subj=Node(id='a', type='X'), obj=Node(id='b', type='Y'), \
            type='precedes', timestamp='1820')\n\
            Node(id='a', type='X')\nNode(id='b', type='Y')";
        let element = GraphExtractor::default().extract(text, "");
        assert_eq!(element.relationships.len(), 1);
        assert_eq!(element.relationships[0].timestamp.as_deref(), Some("1820"));
    }

    #[test]
    fn test_endpoints_use_declared_node() {
        let text = "Node(id='a', type='Declared')\nNode(id='b', type='Declared')\n\
            Relationship(subj=Node(id='a', type='Inline'), obj=Node(id='b', type='Inline'), type='r')";
        let element = GraphExtractor::default().extract(text, "");
        assert_eq!(element.relationships[0].subject.node_type, "Declared");
    }

    #[test]
    fn test_source_property_tags() {
        let element = GraphExtractor::new("phase2").extract(SCENARIO, "");
        assert!(element
            .nodes
            .iter()
            .all(|n| n.properties.get("source").map(String::as_str) == Some("phase2")));
        assert_eq!(
            element.relationships[0].properties.get("source").map(String::as_str),
            Some("phase2")
        );
    }

    #[test]
    fn test_unrecognised_text_yields_empty_element() {
        let element = GraphExtractor::default().extract("The model rambled instead.", "");
        assert!(element.is_empty());
    }

    #[test]
    fn test_structured_payload_in_fence() {
        let text = r#"Here is the graph:
```json
{"schema": "chronos.graph/v1",
 "nodes": [{"id": "a", "type": "X"}, {"id": "b", "type": "Y"}, {"id": "a", "type": "Z"}],
 "relationships": [
   {"subject": "a", "object": "b", "type": "causes", "timestamp": "1820"},
   {"subject": "a", "object": "z", "type": "causes"}
 ]}
```"#;
        let element = GraphExtractor::default().extract(text, "");
        assert_eq!(element.nodes.len(), 2);
        assert_eq!(element.node("a").map(|n| n.node_type.as_str()), Some("X"));
        assert_eq!(element.relationships.len(), 1);
        assert_eq!(element.relationships[0].object.id, "b");
    }

    #[test]
    fn test_invalid_payload_falls_back_to_scan() {
        let text = "{\"schema\": \"chronos.graph/v1\", \"nodes\": 3}\nNode(id='a', type='X')";
        let element = GraphExtractor::default().extract(text, "");
        assert_eq!(element.nodes.len(), 1);

        let other = "{\"schema\": \"other/v9\", \"nodes\": []}\nNode(id='b', type='Y')";
        assert_eq!(GraphExtractor::default().extract(other, "").nodes[0].id, "b");
    }

    const BARE_PAYLOAD: &str = r#"{"schema": "chronos.graph/v1",
 "nodes": [{"id": "bloodletting", "type": "Treatment"}, {"id": "fever", "type": "Condition"}],
 "relationships": [{"subject": "bloodletting", "object": "fever", "type": "reduces"}]}"#;

    #[test]
    fn test_bare_payload_with_trailing_prose() {
        let text = format!("{}\n\nLet me know if you need more detail.", BARE_PAYLOAD);
        let element = GraphExtractor::default().extract(&text, "");
        assert_eq!(element.nodes.len(), 2);
        assert_eq!(element.relationships.len(), 1);
        assert_eq!(element.relationships[0].rel_type, "reduces");
    }

    #[test]
    fn test_bare_payload_after_leading_prose() {
        let text = format!("Here is the graph {{as requested}}:\n{}\nDone.", BARE_PAYLOAD);
        let element = GraphExtractor::default().extract(&text, "");
        assert_eq!(element.nodes.len(), 2);
        assert_eq!(element.node("fever").map(|n| n.node_type.as_str()), Some("Condition"));
        assert_eq!(element.relationships.len(), 1);
    }

    #[test]
    fn test_source_is_truncated() {
        let long = "x".repeat(5000);
        let element = GraphExtractor::default().extract(SCENARIO, &long);
        assert_eq!(element.source.chars().count(), MAX_SOURCE_CHARS);

        let snippet = source_snippet(&"b".repeat(800), &"d".repeat(800));
        assert!(snippet.starts_with("Stage1: bbb"));
        assert!(snippet.contains("... | Source: ddd"));
        assert!(snippet.chars().count() <= MAX_SOURCE_CHARS);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }
}
