//! Minimum spacing between outbound model requests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::info;

/// Enforces `base_delay` between requests acquired by any holder of this pacer.
///
/// Callers queue on an async mutex (FIFO), so one pacer is a serialization
/// point: share an instance only when cross-run throttling is intended.
pub struct RequestPacer {
    base_delay: Duration,
    gate: tokio::sync::Mutex<()>,
    last_request: Mutex<Option<Instant>>,
    request_count: AtomicU64,
}

/// Point-in-time pacer counters.
#[derive(Debug, Clone, Serialize)]
pub struct PacerStats {
    #[serde(rename = "requestCount")]
    pub request_count: u64,
    #[serde(rename = "sinceLastRequestMs")]
    pub since_last_request_ms: Option<u64>,
    #[serde(rename = "baseDelayMs")]
    pub base_delay_ms: u64,
}

impl RequestPacer {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            gate: tokio::sync::Mutex::new(()),
            last_request: Mutex::new(None),
            request_count: AtomicU64::new(0),
        }
    }

    /// Wait until `base_delay` has passed since the previous acquisition, then
    /// record this one. Returns how long the caller was held.
    pub async fn acquire(&self) -> Duration {
        let _turn = self.gate.lock().await;

        let last = *self.last_request.lock();
        let mut waited = Duration::ZERO;
        if let Some(last) = last {
            let elapsed = last.elapsed();
            if elapsed < self.base_delay {
                waited = self.base_delay - elapsed;
                info!("Rate limiting: waiting {:.1}s before next request", waited.as_secs_f64());
                tokio::time::sleep(waited).await;
            }
        }

        *self.last_request.lock() = Some(Instant::now());
        self.request_count.fetch_add(1, Ordering::SeqCst);
        waited
    }

    pub fn stats(&self) -> PacerStats {
        let since_last = self
            .last_request
            .lock()
            .map(|t| t.elapsed().as_millis() as u64);
        PacerStats {
            request_count: self.request_count.load(Ordering::SeqCst),
            since_last_request_ms: since_last,
            base_delay_ms: self.base_delay.as_millis() as u64,
        }
    }

    /// Forget the last request time and zero the counter.
    pub fn reset(&self) {
        *self.last_request.lock() = None;
        self.request_count.store(0, Ordering::SeqCst);
        info!("Request pacer statistics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_does_not_wait() {
        let pacer = RequestPacer::new(Duration::from_secs(12));
        assert_eq!(pacer.acquire().await, Duration::ZERO);
        assert_eq!(pacer.stats().request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_waits_remaining_spacing() {
        let pacer = RequestPacer::new(Duration::from_secs(12));
        pacer.acquire().await;

        tokio::time::advance(Duration::from_secs(5)).await;
        let start = Instant::now();
        let waited = pacer.acquire().await;

        assert_eq!(waited, Duration::from_secs(7));
        let blocked = start.elapsed();
        assert!(blocked >= Duration::from_secs(7));
        assert!(blocked < Duration::from_millis(7_050));
        assert_eq!(pacer.stats().request_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spaced_acquires_do_not_wait() {
        let pacer = RequestPacer::new(Duration::from_secs(2));
        pacer.acquire().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(pacer.acquire().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_are_serialized() {
        let pacer = Arc::new(RequestPacer::new(Duration::from_secs(4)));
        let start = Instant::now();

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let pacer = pacer.clone();
                tokio::spawn(async move {
                    pacer.acquire().await;
                    Instant::now()
                })
            })
            .collect();

        let mut finished = Vec::new();
        for h in handles {
            finished.push(h.await.unwrap() - start);
        }
        finished.sort();

        assert!(finished[0] < Duration::from_secs(1));
        assert!(finished[1] >= Duration::from_secs(4));
        assert!(finished[2] >= Duration::from_secs(8));
        assert_eq!(pacer.stats().request_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_state() {
        let pacer = RequestPacer::new(Duration::from_secs(12));
        pacer.acquire().await;
        pacer.reset();
        let stats = pacer.stats();
        assert_eq!(stats.request_count, 0);
        assert!(stats.since_last_request_ms.is_none());
        assert_eq!(pacer.acquire().await, Duration::ZERO);
    }
}
