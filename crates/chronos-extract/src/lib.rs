//! CHRONOS Extract: deterministic parsing of model output into typed records.

pub mod graph;
pub mod hypotheses;

pub use graph::{source_snippet, truncate_chars, GraphExtractor, GRAPH_SCHEMA_V1, MAX_SOURCE_CHARS};
pub use hypotheses::{parse_hypotheses, parse_ranking, select_top, Hypothesis, Innovation};
