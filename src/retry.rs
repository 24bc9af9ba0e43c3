//! Bounded retry with exponential backoff
//!
//! Generic over any zero-argument async operation so the same primitive
//! backs page-load waits, per-page scraping, and pagination advances.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Default total attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
/// Default first backoff delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(3);

/// Bounded-retry-with-exponential-backoff policy
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Run `op` up to `max_attempts` times, sleeping `base_delay * 2^(n-1)`
    /// after the n-th failure. Returns the last error once attempts are
    /// exhausted.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        warn!("Giving up after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "Attempt {}/{} failed: {} (retrying in {:?})",
                        attempt, self.max_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures_with_doubling_delays() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let policy = RetryPolicy::new(4, Duration::from_millis(10));
        let started = tokio::time::Instant::now();

        let result: Result<u32, String> = policy
            .run(|| {
                let calls = calls_in_op.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 4 {
                        Err(format!("flaky selector (call {})", n))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 10 + 20 + 40 ms of backoff under paused time
        assert_eq!(started.elapsed(), Duration::from_millis(70));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_when_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        let result: Result<(), String> = policy
            .run(|| {
                let calls = calls_in_op.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    Err(format!("still down ({})", n))
                }
            })
            .await;

        assert_eq!(result.unwrap_err(), "still down (3)");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn immediate_success_does_not_sleep() {
        let policy = RetryPolicy::default();
        let result: Result<&str, String> = policy.run(|| async { Ok("ok") }).await;
        assert_eq!(result.unwrap(), "ok");
    }
}
