//! Circuit breaker over a remote endpoint.
//!
//! States: Closed -> Open -> HalfOpen -> Closed|Open. Counters are atomics;
//! transitions run inside one short mutex-guarded critical section. No lock
//! is held across the wrapped call.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use seshat_core::{ClockSource, SessionError, SessionResult};

use crate::config::{BreakerConfig, SessionConfig};
use crate::metrics::{names, StoreMetrics};

/// Breaker state, readable for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow through; consecutive failures are counted.
    Closed,
    /// Calls fail fast with `CircuitOpen` until the reset timeout elapses.
    Open,
    /// A bounded number of probe calls are admitted.
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at_ms: u64,
    half_open_inflight: u32,
}

/// One breaker per remote endpoint.
///
/// The breaker wraps the retry wrapper: retries inside one logical call
/// count as a single breaker call, so only the final outcome updates the
/// state machine. Only `Storage` faults count as endpoint failures; data
/// outcomes like `NotFound` or `Corruption` prove the endpoint reachable
/// and reset the failure streak.
pub struct CircuitBreaker {
    config: BreakerConfig,
    enabled: bool,
    inner: Mutex<Inner>,
    clock: Arc<dyn ClockSource>,
    metrics: StoreMetrics,
}

impl CircuitBreaker {
    /// Builds a breaker from a frozen config.
    #[must_use]
    pub fn new(config: &SessionConfig, clock: Arc<dyn ClockSource>, metrics: StoreMetrics) -> Self {
        Self {
            config: config.circuit_breaker.clone(),
            enabled: config.circuit_breaker_enabled,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at_ms: 0,
                half_open_inflight: 0,
            }),
            clock,
            metrics,
        }
    }

    /// Current state, for health reporting and tests.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    /// Runs `op` under breaker admission control.
    ///
    /// # Errors
    ///
    /// `CircuitOpen` when the breaker refuses the call; otherwise whatever
    /// `op` returns.
    pub async fn call<T, F, Fut>(&self, op: F) -> SessionResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SessionResult<T>>,
    {
        if !self.enabled {
            return op().await;
        }

        let was_probe = self.admit()?;
        let result = op().await;
        match &result {
            // Storage faults are endpoint failures; every other outcome
            // (including NotFound/Corruption) proves the endpoint responsive.
            Err(SessionError::Storage { .. }) => self.on_failure(was_probe),
            _ => self.on_success(was_probe),
        }
        result
    }

    fn admit(&self) -> SessionResult<bool> {
        let now_ms = self.clock.now_ms();
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(false),
            BreakerState::Open => {
                if now_ms.saturating_sub(inner.opened_at_ms) >= self.config.reset_timeout_ms {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_inflight = 1;
                    drop(inner);
                    self.metrics.incr(names::BREAKER_HALF_OPEN);
                    info!("circuit breaker half-open, probing endpoint");
                    Ok(true)
                } else {
                    Err(SessionError::CircuitOpen)
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_inflight < self.config.half_open_max_calls {
                    inner.half_open_inflight += 1;
                    Ok(true)
                } else {
                    Err(SessionError::CircuitOpen)
                }
            }
        }
    }

    fn on_success(&self, was_probe: bool) {
        let mut inner = self.inner.lock();
        if was_probe && inner.state == BreakerState::HalfOpen {
            info!("circuit breaker closed after successful probe");
        }
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_inflight = 0;
    }

    fn on_failure(&self, was_probe: bool) {
        let now_ms = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let opened = match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at_ms = now_ms;
                inner.half_open_inflight = 0;
                true
            }
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at_ms = now_ms;
                    true
                } else {
                    false
                }
            }
            // A stale probe failing after another probe already reopened:
            // refresh the timer.
            BreakerState::Open => {
                inner.opened_at_ms = now_ms;
                false
            }
        };
        let failures = inner.consecutive_failures;
        drop(inner);
        if opened {
            self.metrics.incr(names::BREAKER_OPEN);
            warn!(
                consecutive_failures = failures,
                probe = was_probe,
                "circuit breaker opened"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use seshat_core::ManualClock;

    use super::*;

    fn breaker(threshold: u32, reset_ms: u64, half_open_max: u32) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let config = SessionConfig {
            circuit_breaker_enabled: true,
            circuit_breaker: BreakerConfig {
                failure_threshold: threshold,
                reset_timeout_ms: reset_ms,
                half_open_max_calls: half_open_max,
            },
            ..SessionConfig::default()
        };
        let b = CircuitBreaker::new(
            &config,
            Arc::clone(&clock) as Arc<dyn ClockSource>,
            StoreMetrics::disabled(),
        );
        (b, clock)
    }

    async fn fail(b: &CircuitBreaker) -> SessionResult<()> {
        b.call(|| async { Err(SessionError::timeout("injected")) })
            .await
    }

    async fn succeed(b: &CircuitBreaker) -> SessionResult<u32> {
        b.call(|| async { Ok(7u32) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_and_fails_fast() {
        let (b, _clock) = breaker(5, 100, 1);

        for _ in 0..5 {
            assert_eq!(fail(&b).await.unwrap_err().kind(), "storage");
        }
        assert_eq!(b.state(), BreakerState::Open);

        // Sixth call never reaches the endpoint.
        let err = succeed(&b).await.unwrap_err();
        assert_eq!(err.kind(), "circuit_open");
    }

    #[tokio::test]
    async fn probe_allowed_after_reset_timeout_success_closes() {
        let (b, clock) = breaker(5, 100, 1);
        for _ in 0..5 {
            let _ = fail(&b).await;
        }
        assert_eq!(b.state(), BreakerState::Open);

        clock.advance(100);
        assert_eq!(succeed(&b).await.unwrap(), 7);
        assert_eq!(b.state(), BreakerState::Closed);

        // Streak is reset: a single new failure does not reopen.
        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn probe_failure_reopens_and_rearms_timer() {
        let (b, clock) = breaker(2, 100, 1);
        let _ = fail(&b).await;
        let _ = fail(&b).await;
        assert_eq!(b.state(), BreakerState::Open);

        clock.advance(100);
        let _ = fail(&b).await; // probe fails
        assert_eq!(b.state(), BreakerState::Open);

        // Timer restarted: still open 50ms later.
        clock.advance(50);
        assert_eq!(succeed(&b).await.unwrap_err().kind(), "circuit_open");

        clock.advance(50);
        assert!(succeed(&b).await.is_ok());
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn half_open_bounds_concurrent_probes() {
        let (b, clock) = breaker(1, 100, 1);
        let b = Arc::new(b);
        let _ = fail(&b).await;
        clock.advance(100);

        // First probe parks on a channel, holding the only probe slot.
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let probe = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                b.call(|| async move {
                    let _ = release_rx.await;
                    Ok(1u32)
                })
                .await
            })
        };

        // Give the probe a chance to be admitted.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(b.state(), BreakerState::HalfOpen);

        // Concurrent second call exceeds half_open_max_calls.
        assert_eq!(succeed(&b).await.unwrap_err().kind(), "circuit_open");

        release_tx.send(()).unwrap();
        assert_eq!(probe.await.unwrap().unwrap(), 1);
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn not_found_resets_failure_streak() {
        let (b, _clock) = breaker(2, 100, 1);
        let _ = fail(&b).await;

        // NotFound is a data outcome, not an endpoint failure.
        let r: SessionResult<()> = b
            .call(|| async {
                Err(SessionError::NotFound {
                    id: "missing".to_string(),
                })
            })
            .await;
        assert_eq!(r.unwrap_err().kind(), "not_found");

        let _ = fail(&b).await;
        assert_eq!(
            b.state(),
            BreakerState::Closed,
            "streak restarted after reachable outcome"
        );
    }

    #[tokio::test]
    async fn disabled_breaker_never_trips() {
        let clock = Arc::new(ManualClock::new(0));
        let config = SessionConfig {
            circuit_breaker_enabled: false,
            ..SessionConfig::default()
        };
        let b = CircuitBreaker::new(&config, clock, StoreMetrics::disabled());
        for _ in 0..50 {
            assert_eq!(fail(&b).await.unwrap_err().kind(), "storage");
        }
        assert_eq!(b.state(), BreakerState::Closed);
    }
}
