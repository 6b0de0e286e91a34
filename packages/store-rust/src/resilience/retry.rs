//! Bounded retries with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use seshat_core::SessionResult;

use crate::config::{RetryConfig, SessionConfig};
use crate::metrics::{names, StoreMetrics};

/// Retry policy for remote store calls.
///
/// Delay for attempt `n` (1-indexed) is
/// `min(max_delay, base_delay * multiplier^(n-1))` scaled by
/// `1 +/- uniform(0, jitter)`. Only errors classified retryable
/// ([`seshat_core::SessionError::is_retryable`]) are re-attempted; everything
/// else propagates immediately.
pub struct RetryPolicy {
    config: RetryConfig,
    enabled: bool,
    metrics: StoreMetrics,
}

impl RetryPolicy {
    /// Builds the policy from a frozen config.
    #[must_use]
    pub fn new(config: &SessionConfig, metrics: StoreMetrics) -> Self {
        Self {
            config: config.retry.clone(),
            enabled: config.enable_retry,
            metrics,
        }
    }

    /// Backoff delay after failed attempt `n` (1-indexed), jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .backoff_multiplier
            .powi(i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX));
        #[allow(clippy::cast_precision_loss)]
        let raw = (self.config.base_delay_ms as f64 * exp).min(self.config.max_delay_ms as f64);
        let jitter = self.config.jitter;
        let scale = if jitter > 0.0 {
            1.0 + rand::rng().random_range(-jitter..=jitter)
        } else {
            1.0
        };
        Duration::from_millis((raw * scale).max(0.0) as u64)
    }

    /// Runs `op`, retrying transient failures up to `max_attempts` total
    /// attempts. Increments `session.retry.attempt` once per attempt.
    ///
    /// # Errors
    ///
    /// The last error from `op` when attempts are exhausted or the error is
    /// not retryable.
    pub async fn run<T, F, Fut>(&self, op: F) -> SessionResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = SessionResult<T>>,
    {
        let max_attempts = if self.enabled {
            self.config.max_attempts.max(1)
        } else {
            1
        };
        let mut attempt = 1;
        loop {
            self.metrics.incr(names::RETRY_ATTEMPT);
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient storage fault, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use seshat_core::SessionError;

    use super::*;

    fn policy(max_attempts: u32, base_delay_ms: u64, jitter: f64) -> RetryPolicy {
        let config = SessionConfig {
            enable_retry: true,
            retry: RetryConfig {
                max_attempts,
                base_delay_ms,
                max_delay_ms: 1_000,
                backoff_multiplier: 2.0,
                jitter,
            },
            ..SessionConfig::default()
        };
        RetryPolicy::new(&config, StoreMetrics::disabled())
    }

    #[tokio::test(start_paused = true)]
    async fn two_timeouts_then_success() {
        let policy = policy(3, 10, 0.0);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result = policy
            .run(move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(SessionError::timeout("injected"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_exhausted_returns_last_error() {
        let policy = policy(3, 10, 0.0);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result: SessionResult<()> = policy
            .run(move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SessionError::timeout("still down"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), "storage");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_fails_fast() {
        let policy = policy(5, 10, 0.0);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result: SessionResult<()> = policy
            .run(move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SessionError::Corruption {
                        reason: "mac".to_string(),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), "corruption");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "corruption never retries");
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_retry_makes_single_attempt() {
        let config = SessionConfig {
            enable_retry: false,
            ..SessionConfig::default()
        };
        let policy = RetryPolicy::new(&config, StoreMetrics::disabled());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in = Arc::clone(&calls);

        let result: SessionResult<()> = policy
            .run(move || {
                let calls = Arc::clone(&calls_in);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(SessionError::timeout("down"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = policy(10, 100, 0.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        // Capped at max_delay_ms = 1000.
        assert_eq!(policy.delay_for(6), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(30), Duration::from_millis(1_000));
    }

    #[test]
    fn jitter_stays_within_band() {
        let policy = policy(10, 100, 0.1);
        for _ in 0..100 {
            let delay = policy.delay_for(1).as_millis() as u64;
            assert!((90..=110).contains(&delay), "delay {delay} out of band");
        }
    }
}
