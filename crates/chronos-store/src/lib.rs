//! CHRONOS Store: graph data model, per-run SQLite graph databases, an
//! in-process petgraph view and filesystem stage artifacts.

pub mod artifacts;
pub mod graph;
pub mod schema;
pub mod sqlite;
pub mod types;

use std::sync::Arc;

use chronos_core::Result;

pub use artifacts::FsArtifactStore;
pub use graph::{GraphBackend, SharedGraph};
pub use sqlite::SqliteGraphStore;
pub use types::*;

/// Durable destination for extracted graph elements.
pub trait GraphSink: Send + Sync {
    fn store(&self, element: &GraphElement) -> Result<()>;
}

/// Durable destination for raw stage outputs.
pub trait ArtifactSink: Send + Sync {
    fn write(&self, artifact: &ArtifactWrite<'_>) -> Result<ArtifactMeta>;
}

/// Stores into every inner sink; reports the first failure after trying all.
#[derive(Default, Clone)]
pub struct GraphSinks(pub Vec<Arc<dyn GraphSink>>);

impl GraphSink for GraphSinks {
    fn store(&self, element: &GraphElement) -> Result<()> {
        let mut first_err = None;
        for sink in &self.0 {
            if let Err(e) = sink.store(element) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronos_core::Error;

    struct Broken;

    impl GraphSink for Broken {
        fn store(&self, _element: &GraphElement) -> Result<()> {
            Err(Error::Database("disk I/O error".into()))
        }
    }

    #[test]
    fn test_fanout_stores_everywhere_before_failing() {
        let shared = Arc::new(SharedGraph::default());
        let inner: Vec<Arc<dyn GraphSink>> = vec![Arc::new(Broken), shared.clone()];
        let sinks = GraphSinks(inner);
        let element = GraphElement {
            nodes: vec![Node::new("a", "Concept")],
            ..Default::default()
        };

        assert!(sinks.store(&element).is_err());
        assert_eq!(shared.read().stats().node_count, 1);
    }
}
