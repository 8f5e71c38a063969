//! Parsing of H-format research questions and their ranking.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

static SECTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(H\d+):").expect("section pattern"));
static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*(H\d+):\s+([^*]+)\*\*").expect("title pattern"));
static TESTABILITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*Testability Score:\s*(\d+)/10\*\*").expect("score pattern"));
static INNOVATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\*\*Innovation Potential:\s*(High|Moderate|Low)\*\*").expect("innovation pattern")
});
static RANKING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.\s+\*\*(H\d+):").expect("ranking pattern"));

const FIELD_ORDER: [&str; 6] = [
    "Claim Statement",
    "Historical Source",
    "Modern Relevance",
    "Variables",
    "Mechanism",
    "Testability Score",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Innovation {
    High,
    Moderate,
    Low,
}

impl Innovation {
    fn parse(s: &str) -> Self {
        match s {
            "High" => Self::High,
            "Low" => Self::Low,
            _ => Self::Moderate,
        }
    }
}

/// One research question from the Stage4 output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hypothesis {
    /// `H1`, `H2`, ...
    pub id: String,
    pub title: String,
    pub claim: String,
    #[serde(rename = "historicalSource")]
    pub historical_source: String,
    #[serde(rename = "modernRelevance")]
    pub modern_relevance: String,
    pub variables: String,
    pub mechanism: String,
    /// Out of 10; 5 when the score line is missing.
    pub testability: u8,
    pub innovation: Innovation,
}

/// Body of `**<label>:**` up to the next field label, or the section end.
fn field(section: &str, label: &str) -> String {
    let marker = format!("**{}:**", label);
    let Some(pos) = section.find(&marker) else {
        return String::new();
    };
    let body = &section[pos + marker.len()..];

    let next_labels = FIELD_ORDER
        .iter()
        .skip_while(|l| **l != label)
        .skip(1)
        .filter_map(|l| body.find(&format!("\n**{}", l)));
    let end = next_labels.min().unwrap_or(body.len());
    body[..end].trim().to_string()
}

/// Split `text` at each `**H<n>:` marker and parse every section that has a title.
pub fn parse_hypotheses(text: &str) -> Vec<Hypothesis> {
    let starts: Vec<usize> = SECTION_RE.find_iter(text).map(|m| m.start()).collect();
    let mut hypotheses = Vec::with_capacity(starts.len());

    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(text.len());
        let section = &text[start..end];

        let Some(title) = TITLE_RE.captures(section) else {
            continue;
        };

        let testability = TESTABILITY_RE
            .captures(section)
            .and_then(|c| c[1].parse::<u8>().ok())
            .map(|n| n.min(10))
            .unwrap_or(5);
        let innovation = INNOVATION_RE
            .captures(section)
            .map(|c| Innovation::parse(&c[1]))
            .unwrap_or(Innovation::Moderate);

        hypotheses.push(Hypothesis {
            id: title[1].to_string(),
            title: title[2].trim().to_string(),
            claim: field(section, "Claim Statement"),
            historical_source: field(section, "Historical Source"),
            modern_relevance: field(section, "Modern Relevance"),
            variables: field(section, "Variables"),
            mechanism: field(section, "Mechanism"),
            testability,
            innovation,
        });
    }

    debug!("Parsed {} hypotheses", hypotheses.len());
    hypotheses
}

/// Hypothesis ids in ranked order (`1. **H3: ...`), first `top_n` distinct ids.
pub fn parse_ranking(text: &str, top_n: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    RANKING_RE
        .captures_iter(text)
        .map(|c| c[2].to_string())
        .filter(|id| seen.insert(id.clone()))
        .take(top_n)
        .collect()
}

/// Hypotheses named by `ranked_ids`, in that order. Falls back to the first
/// `top_n` parsed hypotheses when the ranking names none of them.
pub fn select_top(hypotheses: &[Hypothesis], ranked_ids: &[String], top_n: usize) -> Vec<Hypothesis> {
    let selected: Vec<Hypothesis> = ranked_ids
        .iter()
        .filter_map(|id| hypotheses.iter().find(|h| &h.id == id).cloned())
        .take(top_n)
        .collect();
    if selected.is_empty() {
        hypotheses.iter().take(top_n).cloned().collect()
    } else {
        selected
    }
}
