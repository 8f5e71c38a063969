//! Error types for CHRONOS.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Missing credentials or unusable configuration. Never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Empty or invalid response from model")]
    EmptyResponse,

    #[error("HTTP error: {0}")]
    Http(String),

    /// Artifact storage could not be written. Aborts the run.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error must abort the whole run without retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Storage(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
