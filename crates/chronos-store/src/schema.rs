//! Graph database schema.

/// Nodes keyed by id, relationships unique per (subject, object, type).
pub const GRAPH_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    node_type TEXT NOT NULL,
    properties_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS relationships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_id TEXT NOT NULL REFERENCES nodes(id),
    object_id TEXT NOT NULL REFERENCES nodes(id),
    rel_type TEXT NOT NULL,
    timestamp TEXT,
    properties_json TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    UNIQUE(subject_id, object_id, rel_type)
);

CREATE INDEX IF NOT EXISTS idx_relationships_subject ON relationships(subject_id);
CREATE INDEX IF NOT EXISTS idx_relationships_object ON relationships(object_id);

CREATE TABLE IF NOT EXISTS sources (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);
"#;
