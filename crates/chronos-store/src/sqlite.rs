//! SQLite-backed graph store, one database file per pipeline run.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::schema::GRAPH_SCHEMA_SQL;
use crate::types::*;
use crate::GraphSink;
use chronos_core::{Error, Result};

/// Durable graph storage. Repeated stores of the same element are no-ops.
pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// Decode a stored properties column. Corrupt JSON loads as no properties.
fn decode_properties(raw: &str, owner: &str) -> Properties {
    match serde_json::from_str(raw) {
        Ok(properties) => properties,
        Err(e) => {
            warn!("Ignoring unreadable properties of {}: {}", owner, e);
            Properties::new()
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SqliteGraphStore {
    /// Open or create `<db_dir>/<name>.db`.
    pub fn open(db_dir: impl AsRef<Path>, name: &str) -> Result<Self> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(Error::Storage(format!("invalid graph database name: {}", name)));
        }
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join(format!("{}.db", name));

        let conn = Self::create_connection(&db_path)?;
        conn.execute_batch(GRAPH_SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
        };
        let stats = store.stats()?;
        info!(
            "SqliteGraphStore initialized: {} nodes, {} relationships, path={}",
            stats.node_count,
            stats.relationship_count,
            store.db_path.display()
        );
        Ok(store)
    }

    /// Per-run database named `chronos_<run_id>`.
    pub fn for_run(db_dir: impl AsRef<Path>, run_id: &str) -> Result<Self> {
        Self::open(db_dir, &format!("chronos_{}", run_id))
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Insert every node, relationship and the provenance text in one transaction.
    pub fn store_element(&self, element: &GraphElement) -> Result<GraphStats> {
        let now = now_millis();
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(db_err)?;
        let mut added = GraphStats::default();

        {
            let mut insert_node = tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO nodes (id, node_type, properties_json, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(db_err)?;
            let endpoints = element
                .relationships
                .iter()
                .flat_map(|r| [&r.subject, &r.object]);
            for node in element.nodes.iter().chain(endpoints) {
                let props = serde_json::to_string(&node.properties)?;
                added.node_count += insert_node
                    .execute(params![node.id, node.node_type, props, now])
                    .map_err(db_err)?;
            }

            let mut insert_rel = tx
                .prepare_cached(
                    "INSERT OR IGNORE INTO relationships
                     (subject_id, object_id, rel_type, timestamp, properties_json, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .map_err(db_err)?;
            for rel in &element.relationships {
                let props = serde_json::to_string(&rel.properties)?;
                added.relationship_count += insert_rel
                    .execute(params![
                        rel.subject.id,
                        rel.object.id,
                        rel.rel_type,
                        rel.timestamp,
                        props,
                        now
                    ])
                    .map_err(db_err)?;
            }

            if !element.source.is_empty() {
                tx.prepare_cached("INSERT OR IGNORE INTO sources (source, created_at) VALUES (?1, ?2)")
                    .map_err(db_err)?
                    .execute(params![element.source, now])
                    .map_err(db_err)?;
            }
        }

        tx.commit().map_err(db_err)?;
        debug!(
            "Stored graph element: {} new nodes, {} new relationships",
            added.node_count, added.relationship_count
        );
        Ok(added)
    }

    /// Read the whole graph back. The most recent provenance text becomes `source`.
    pub fn load(&self) -> Result<GraphElement> {
        let conn = self.conn.lock();

        let nodes = conn
            .prepare_cached("SELECT id, node_type, properties_json FROM nodes ORDER BY seq")
            .map_err(db_err)?
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?
            .into_iter()
            .map(|(id, node_type, props)| Node {
                properties: decode_properties(&props, &id),
                id,
                node_type,
            })
            .collect::<Vec<_>>();

        let rows = conn
            .prepare_cached(
                "SELECT subject_id, object_id, rel_type, timestamp, properties_json
                 FROM relationships ORDER BY id",
            )
            .map_err(db_err)?
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(db_err)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let lookup = |id: &str| nodes.iter().find(|n| n.id == id).cloned();
        let relationships = rows
            .into_iter()
            .filter_map(|(subj, obj, rel_type, timestamp, props)| {
                let properties = decode_properties(&props, &format!("{} -{}-> {}", subj, rel_type, obj));
                Some(Relationship {
                    subject: lookup(&subj)?,
                    object: lookup(&obj)?,
                    rel_type,
                    timestamp,
                    properties,
                })
            })
            .collect();

        let source = match conn.query_row(
            "SELECT source FROM sources ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get::<_, String>(0),
        ) {
            Ok(source) => source,
            Err(rusqlite::Error::QueryReturnedNoRows) => String::new(),
            Err(e) => return Err(db_err(e)),
        };

        Ok(GraphElement {
            nodes,
            relationships,
            source,
        })
    }

    pub fn stats(&self) -> Result<GraphStats> {
        let conn = self.conn.lock();
        let node_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))
            .map_err(db_err)?;
        let relationship_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM relationships", [], |row| row.get(0))
            .map_err(db_err)?;
        Ok(GraphStats {
            node_count: node_count as usize,
            relationship_count: relationship_count as usize,
        })
    }
}

impl GraphSink for SqliteGraphStore {
    fn store(&self, element: &GraphElement) -> Result<()> {
        self.store_element(element).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (SqliteGraphStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteGraphStore::for_run(dir.path(), "run1").unwrap();
        (store, dir)
    }

    fn sample() -> GraphElement {
        let a = Node::new("blood_congestion", "ClinicalObservation").with_property("source", "phase2");
        let b = Node::new("paralysis", "ClinicalObservation").with_property("source", "phase2");
        GraphElement {
            relationships: vec![Relationship {
                subject: a.clone(),
                object: b.clone(),
                rel_type: "results_in".into(),
                timestamp: Some("1820".into()),
                properties: [("source".to_string(), "phase2".to_string())].into(),
            }],
            nodes: vec![a, b],
            source: "Stage1: ... | Source: ...".into(),
        }
    }

    #[test]
    fn test_per_run_database_file() {
        let (store, dir) = test_store();
        assert_eq!(store.db_path(), dir.path().join("chronos_run1.db"));
        assert!(store.db_path().exists());
    }

    #[test]
    fn test_store_and_load() {
        let (store, _dir) = test_store();
        let element = sample();
        let added = store.store_element(&element).unwrap();
        assert_eq!(added.node_count, 2);
        assert_eq!(added.relationship_count, 1);

        let loaded = store.load().unwrap();
        assert_eq!(loaded, element);
    }

    #[test]
    fn test_repeated_store_is_tolerated() {
        let (store, _dir) = test_store();
        store.store(&sample()).unwrap();
        store.store(&sample()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.relationship_count, 1);
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = TempDir::new().unwrap();
        assert!(SqliteGraphStore::open(dir.path(), "../escape").is_err());
        assert!(SqliteGraphStore::open(dir.path(), "").is_err());
    }

    #[test]
    fn test_corrupt_properties_load_as_empty() {
        let (store, _dir) = test_store();
        store.store_element(&sample()).unwrap();
        store
            .conn
            .lock()
            .execute(
                "UPDATE nodes SET properties_json = 'not json' WHERE id = 'paralysis'",
                [],
            )
            .unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.nodes.len(), 2);
        let paralysis = loaded.node("paralysis").unwrap();
        assert!(paralysis.properties.is_empty());
        assert_eq!(loaded.relationships.len(), 1);
        assert_eq!(loaded.source, "Stage1: ... | Source: ...");
    }

    #[test]
    fn test_missing_sources_table_is_an_error() {
        let (store, _dir) = test_store();
        store.conn.lock().execute_batch("DROP TABLE sources").unwrap();
        assert!(matches!(store.load(), Err(Error::Database(_))));
    }

    #[test]
    fn test_empty_store() {
        let (store, _dir) = test_store();
        let loaded = store.load().unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.source.is_empty());
    }
}
