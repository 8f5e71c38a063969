//! Filesystem artifact store: `<root>/<run>/<stage>/<step>.txt` plus `.meta.json`.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::types::{ArtifactMeta, ArtifactWrite};
use crate::ArtifactSink;
use chronos_core::{Error, Result};

pub struct FsArtifactStore {
    root: PathBuf,
}

fn storage_err(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment.contains(['/', '\\'])
        || segment == "."
        || segment == ".."
    {
        return Err(Error::Storage(format!("invalid artifact path segment: {:?}", segment)));
    }
    Ok(())
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(storage_err)?;
        info!("Artifact store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn step_dir(&self, run_id: &str, stage: &str) -> Result<PathBuf> {
        check_segment(run_id)?;
        check_segment(stage)?;
        Ok(self.root.join(run_id).join(stage))
    }

    /// Read a previously written artifact, if any.
    pub fn read(&self, run_id: &str, stage: &str, step: &str) -> Result<Option<String>> {
        check_segment(step)?;
        let path = self.step_dir(run_id, stage)?.join(format!("{}.txt", step));
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// All metadata records for a run, ordered by write time.
    pub fn list(&self, run_id: &str) -> Result<Vec<ArtifactMeta>> {
        check_segment(run_id)?;
        let run_dir = self.root.join(run_id);
        let mut metas = Vec::new();
        let Ok(stages) = std::fs::read_dir(&run_dir) else {
            return Ok(metas);
        };
        for stage in stages.flatten() {
            let Ok(files) = std::fs::read_dir(stage.path()) else {
                continue;
            };
            for file in files.flatten() {
                let path = file.path();
                if path.to_string_lossy().ends_with(".meta.json") {
                    let raw = std::fs::read_to_string(&path).map_err(storage_err)?;
                    metas.push(serde_json::from_str::<ArtifactMeta>(&raw)?);
                }
            }
        }
        metas.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(metas)
    }
}

impl ArtifactSink for FsArtifactStore {
    fn write(&self, artifact: &ArtifactWrite<'_>) -> Result<ArtifactMeta> {
        check_segment(artifact.step)?;
        let dir = self.step_dir(artifact.run_id, artifact.stage)?;
        std::fs::create_dir_all(&dir).map_err(storage_err)?;

        let meta = ArtifactMeta {
            run_id: artifact.run_id.to_string(),
            stage: artifact.stage.to_string(),
            step: artifact.step.to_string(),
            input_length: artifact.input_length,
            output_length: artifact.output.chars().count(),
            timestamp: chrono::Utc::now(),
            sha256: hex::encode(Sha256::digest(artifact.output.as_bytes())),
        };

        std::fs::write(dir.join(format!("{}.txt", artifact.step)), artifact.output)
            .map_err(storage_err)?;
        let meta_json = serde_json::to_string_pretty(&meta)?;
        std::fs::write(dir.join(format!("{}.meta.json", artifact.step)), meta_json)
            .map_err(storage_err)?;

        debug!(
            "Saved artifact {}/{}/{} ({} chars)",
            artifact.run_id, artifact.stage, artifact.step, meta.output_length
        );
        Ok(meta)
    }
}
