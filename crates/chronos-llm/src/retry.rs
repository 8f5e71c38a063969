//! Retry controller for remote model calls.
//!
//! Failures are classified from their message text only: rate-limit markers
//! select a server-suggested (or `base_delay`) wait, anything else gets
//! exponential backoff with jitter. Configuration errors are never retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chronos_core::{Error, RateLimiterConfig, Result};
use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::pacer::RequestPacer;

const RATE_LIMIT_MARKERS: &[&str] = &[
    "429",
    "resource_exhausted",
    "quota",
    "rate limit",
    "too many requests",
];

/// Server hints in priority order; the first match wins.
static SUGGESTED_DELAY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"(?i)"retryDelay"\s*:\s*"(\d+(?:\.\d+)?)s""#,
        r#"(?i)"retryDelay"\s*:\s*(\d+(?:\.\d+)?)"#,
        r"(?i)retryAfter:\s*(\d+(?:\.\d+)?)",
        r"(?i)Retry-After:\s*(\d+(?:\.\d+)?)",
        r"(?i)(\d+(?:\.\d+)?)\s*seconds?\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static retry pattern"))
    .collect()
});

/// How one attempt resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    TransientRateLimit,
    TransientOther,
    Fatal,
}

/// Record of a single attempt, kept only for logging.
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub attempt_index: u32,
    pub started_at: Instant,
    pub outcome: AttemptOutcome,
    pub suggested_delay: Option<Duration>,
}

/// Classify a failure message. Matching is case-insensitive.
pub fn classify_failure(message: &str) -> AttemptOutcome {
    let lower = message.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        AttemptOutcome::TransientRateLimit
    } else {
        AttemptOutcome::TransientOther
    }
}

/// Extract a server-suggested retry delay, in seconds.
pub fn extract_retry_delay(message: &str) -> Option<f64> {
    SUGGESTED_DELAY_PATTERNS.iter().find_map(|re| {
        re.captures(message)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    })
}

/// Wraps one logical model invocation with pacing, classification and backoff.
pub struct RetryController {
    config: RateLimiterConfig,
    pacer: Arc<RequestPacer>,
}

impl RetryController {
    /// Controller with its own pacer spaced at `config.base_delay`.
    pub fn new(config: RateLimiterConfig) -> Self {
        let pacer = Arc::new(RequestPacer::new(config.base_delay));
        Self::with_pacer(config, pacer)
    }

    /// Controller sharing an existing pacer with other controllers.
    pub fn with_pacer(config: RateLimiterConfig, pacer: Arc<RequestPacer>) -> Self {
        info!(
            "RetryController: initial={:?} max={:?} base={:?} retries={} timeout={:?}",
            config.initial_delay,
            config.max_delay,
            config.base_delay,
            config.max_retries,
            config.total_timeout
        );
        Self { config, pacer }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    pub fn pacer(&self) -> &Arc<RequestPacer> {
        &self.pacer
    }

    /// Exponential backoff for a non-rate-limit failure.
    ///
    /// `jitter_fraction` scales `initial_delay`; callers draw it from [0.1, 0.9).
    pub fn backoff_delay(&self, attempt: u32, jitter_fraction: f64) -> Duration {
        let initial = self.config.initial_delay.as_secs_f64();
        let exponential = initial * 2f64.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = (exponential + jitter_fraction * initial).min(self.config.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Wait after a rate-limit failure: the server hint floored at `base_delay`.
    ///
    /// Hints too large for a `Duration` count as no hint.
    pub fn rate_limit_delay(&self, message: &str) -> (Duration, Option<Duration>) {
        let hint = extract_retry_delay(message)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        match hint {
            Some(suggested) => {
                info!(
                    "Extracted server-suggested retry delay: {:.1}s",
                    suggested.as_secs_f64()
                );
                (suggested.max(self.config.base_delay), Some(suggested))
            }
            None => (self.config.base_delay, None),
        }
    }

    /// Run `request` until it yields non-empty text or attempts are exhausted.
    ///
    /// `request` must perform exactly one attempt per call. The last failure is
    /// returned unchanged. `total_timeout` is not enforced here.
    pub async fn invoke<F, Fut>(&self, mut request: F) -> Result<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let max_retries = self.config.max_retries;
        let total = max_retries.saturating_add(1);
        let started = Instant::now();

        for attempt in 0..=max_retries {
            if attempt > 0 {
                self.pacer.acquire().await;
            }

            let attempt_started = Instant::now();
            debug!("Model request attempt {}/{}", attempt + 1, total);

            let err = match request().await {
                Ok(text) if !text.trim().is_empty() => {
                    info!(
                        "Request successful after {} attempt(s) ({:.1}s)",
                        attempt + 1,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(text);
                }
                Ok(_) => Error::EmptyResponse,
                Err(e) => e,
            };

            if err.is_fatal() {
                error!("Fatal error, not retrying: {}", err);
                return Err(err);
            }

            let message = err.to_string();
            let outcome = classify_failure(&message);
            let (wait, suggested) = match outcome {
                AttemptOutcome::TransientRateLimit => {
                    warn!("Rate limit detected: {}", message);
                    self.rate_limit_delay(&message)
                }
                _ => (self.backoff_delay(attempt, jitter_fraction()), None),
            };

            let record = CallAttempt {
                attempt_index: attempt,
                started_at: attempt_started,
                outcome,
                suggested_delay: suggested,
            };
            warn!(
                "Request failed (attempt {}/{}, {:?}): {}",
                record.attempt_index + 1,
                total,
                record.outcome,
                message
            );

            if attempt == max_retries {
                let elapsed = started.elapsed();
                if elapsed > self.config.total_timeout {
                    warn!(
                        "Retries ran {:.1}s, past the {:?} best-effort ceiling",
                        elapsed.as_secs_f64(),
                        self.config.total_timeout
                    );
                }
                error!(
                    "All {} attempts failed. Total time: {:.1}s",
                    total,
                    elapsed.as_secs_f64()
                );
                return Err(err);
            }

            info!("Waiting {:.1}s before retry", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
        }

        Err(Error::Internal("retry loop exited without a result".into()))
    }
}

fn jitter_fraction() -> f64 {
    rand::thread_rng().gen_range(0.1..0.9)
}
