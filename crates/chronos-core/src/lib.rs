//! CHRONOS Core: error taxonomy, configuration and data paths.

pub mod config;
pub mod error;

pub use config::{ChronosConfig, DataPaths, RateLimiterConfig, MAX_RETRIES_LIMIT};
pub use error::{Error, Result};
