//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Paths to all CHRONOS data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Per-run stage artifacts (`data/runs/<run>/<stage>/`).
    pub runs: PathBuf,
    /// One graph database per run (`data/graphs/`).
    pub graphs: PathBuf,
    /// Uploaded source texts (`data/uploads/`).
    pub uploads: PathBuf,
    /// Model provider configuration (`data/llm-config.json`).
    pub llm_config_file: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let graphs = std::env::var("CHRONOS_GRAPH_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| root.join("graphs"));
        let paths = Self {
            runs: root.join("runs"),
            graphs,
            uploads: root.join("uploads"),
            llm_config_file: root.join("llm-config.json"),
            root,
        };
        paths.ensure_dirs()?;
        Ok(paths)
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.runs)?;
        std::fs::create_dir_all(&self.graphs)?;
        std::fs::create_dir_all(&self.uploads)?;
        Ok(())
    }
}

/// Upper bound accepted for `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Pacing and retry parameters for calls to the remote model.
///
/// Immutable once built; every call made through one controller shares it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// First exponential-backoff step.
    pub initial_delay: Duration,
    /// Ceiling for any single backoff wait.
    pub max_delay: Duration,
    /// Minimum spacing between requests, and the floor for rate-limit waits.
    pub base_delay: Duration,
    /// Retries after the first attempt (`max_retries + 1` attempts in total).
    pub max_retries: u32,
    /// Best-effort ceiling handed to the transport as its request timeout.
    pub total_timeout: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
            base_delay: Duration::from_secs(12),
            max_retries: 5,
            total_timeout: Duration::from_secs(1800),
        }
    }
}

impl RateLimiterConfig {
    /// Read overrides from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => {
                    let value: f64 = raw
                        .trim()
                        .parse()
                        .map_err(|_| Error::Config(format!("{} is not a number: {}", key, raw)))?;
                    if !value.is_finite() || value < 0.0 {
                        return Err(Error::Config(format!("{} must be >= 0, got {}", key, raw)));
                    }
                    Ok(Duration::from_secs_f64(value))
                }
                None => Ok(default),
            }
        };

        let max_retries = match lookup("CHRONOS_MAX_RETRIES") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                Error::Config(format!("CHRONOS_MAX_RETRIES is not an integer: {}", raw))
            })?,
            None => defaults.max_retries,
        };

        let config = Self {
            initial_delay: secs("CHRONOS_INITIAL_DELAY_SECS", defaults.initial_delay)?,
            max_delay: secs("CHRONOS_MAX_DELAY_SECS", defaults.max_delay)?,
            base_delay: secs("CHRONOS_BASE_DELAY_SECS", defaults.base_delay)?,
            max_retries,
            total_timeout: secs("CHRONOS_TOTAL_TIMEOUT_SECS", defaults.total_timeout)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(Error::Config(format!(
                "max retries ({}) exceeds the limit of {}",
                self.max_retries, MAX_RETRIES_LIMIT
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(Error::Config(format!(
                "max delay ({:?}) is below initial delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }
}

/// Top-level CHRONOS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChronosConfig {
    /// HTTP server port.
    pub port: u16,
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Retry and pacing policy for model calls.
    pub rate_limiter: RateLimiterConfig,
    /// Share one request pacer across concurrent runs instead of one per run.
    pub shared_pacer: bool,
    /// Hypotheses requested from Stage4.
    pub num_questions: usize,
    /// Hypotheses selected by the ranking step.
    pub top_n: usize,
}

impl ChronosConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> Result<Self> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5000);

        let shared_pacer = std::env::var("CHRONOS_SHARED_PACER")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let data_paths = DataPaths::new(data_dir)?;

        Ok(Self {
            port,
            data_paths,
            rate_limiter: RateLimiterConfig::from_env()?,
            shared_pacer,
            num_questions: 10,
            top_n: 3,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RateLimiterConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, RateLimiterConfig::default());
        assert_eq!(config.initial_delay, Duration::from_secs(2));
        assert_eq!(config.max_delay, Duration::from_secs(300));
        assert_eq!(config.base_delay, Duration::from_secs(12));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.total_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_overrides() {
        let config = RateLimiterConfig::from_lookup(lookup(&[
            ("CHRONOS_INITIAL_DELAY_SECS", "0.5"),
            ("CHRONOS_MAX_DELAY_SECS", "30"),
            ("CHRONOS_BASE_DELAY_SECS", "2"),
            ("CHRONOS_MAX_RETRIES", "3"),
            ("CHRONOS_TOTAL_TIMEOUT_SECS", "600"),
        ]))
        .unwrap();
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.base_delay, Duration::from_secs(2));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.total_timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let err = RateLimiterConfig::from_lookup(lookup(&[("CHRONOS_BASE_DELAY_SECS", "soon")]))
            .unwrap_err();
        assert!(err.is_fatal());

        let err = RateLimiterConfig::from_lookup(lookup(&[
            ("CHRONOS_INITIAL_DELAY_SECS", "10"),
            ("CHRONOS_MAX_DELAY_SECS", "5"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_max_retries_is_bounded() {
        let err = RateLimiterConfig::from_lookup(lookup(&[("CHRONOS_MAX_RETRIES", "4294967295")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = RateLimiterConfig::from_lookup(lookup(&[("CHRONOS_MAX_RETRIES", "100")])).unwrap();
        assert_eq!(config.max_retries, MAX_RETRIES_LIMIT);
    }

    #[test]
    fn test_data_paths_created() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path()).unwrap();
        assert!(paths.runs.is_dir());
        assert!(paths.uploads.is_dir());
        assert_eq!(paths.llm_config_file, dir.path().join("llm-config.json"));
    }
}
