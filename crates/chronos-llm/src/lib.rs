//! Remote model access for the CHRONOS pipeline.
//!
//! Provider clients perform single attempts; `RetryController` layers request
//! pacing, failure classification and backoff on top of them.

pub mod config;
pub mod pacer;
pub mod providers;
pub mod retry;
pub mod types;

pub use config::LLMConfig;
pub use pacer::{PacerStats, RequestPacer};
pub use providers::{create_generator, GeminiClient, OpenAiCompatClient, TextGenerator};
pub use retry::{classify_failure, extract_retry_delay, AttemptOutcome, RetryController};
pub use types::*;
