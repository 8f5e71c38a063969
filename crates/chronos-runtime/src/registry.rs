//! In-memory run records, readable by status pollers at any time.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{PipelineRun, StatusSnapshot};

/// Each run's orchestrator is the only writer of that run's record; readers
/// get cloned snapshots.
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<String, PipelineRun>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run. Returns false if the id is already taken.
    pub fn create(&self, run: PipelineRun) -> bool {
        let mut runs = self.runs.write();
        if runs.contains_key(&run.run_id) {
            return false;
        }
        runs.insert(run.run_id.clone(), run);
        true
    }

    /// Replace the stored record with `run`.
    pub fn publish(&self, run: &PipelineRun) {
        self.runs.write().insert(run.run_id.clone(), run.clone());
    }

    pub fn get(&self, run_id: &str) -> Option<PipelineRun> {
        self.runs.read().get(run_id).cloned()
    }

    pub fn snapshot(&self, run_id: &str) -> Option<StatusSnapshot> {
        self.runs.read().get(run_id).map(PipelineRun::snapshot)
    }

    /// Snapshots of every run, newest first.
    pub fn list(&self) -> Vec<StatusSnapshot> {
        let runs = self.runs.read();
        let mut ordered: Vec<&PipelineRun> = runs.values().collect();
        ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.run_id.cmp(&b.run_id)));
        ordered.into_iter().map(PipelineRun::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RunStatus, Stage};

    #[test]
    fn test_create_publish_snapshot() {
        let registry = RunRegistry::new();
        let mut run = PipelineRun::new("r1", Some("letter.txt".into()));
        assert!(registry.create(run.clone()));
        assert!(!registry.create(run.clone()));

        run.current_stage = Some(Stage::Stage2);
        registry.publish(&run);

        let snap = registry.snapshot("r1").unwrap();
        assert_eq!(snap.status, RunStatus::Running);
        assert_eq!(snap.progress_percent, 50);
        assert!(registry.snapshot("missing").is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let registry = RunRegistry::new();
        let mut older = PipelineRun::new("old", None);
        older.created_at -= chrono::Duration::seconds(60);
        registry.create(older);
        registry.create(PipelineRun::new("new", None));

        let ids: Vec<String> = registry.list().into_iter().map(|s| s.run_id).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(registry.len(), 2);
    }
}
