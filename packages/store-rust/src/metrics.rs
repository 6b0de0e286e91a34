//! Metric names and emission helpers.
//!
//! All emission goes through the `metrics` facade; the embedding application
//! installs whatever recorder it wants (that recorder is the configured
//! metrics backend). Every series carries a `store` tag; error counters add
//! an `error` tag holding the error-kind.

use std::time::Duration;

use seshat_core::SessionError;

use crate::config::MetricsBackend;

/// Canonical metric names.
pub mod names {
    pub const SESSION_CREATED: &str = "session.created";
    pub const SESSION_LOADED: &str = "session.loaded";
    pub const SESSION_DELETED: &str = "session.deleted";
    pub const SESSION_REGENERATED: &str = "session.regenerated";
    pub const SESSION_EXPIRED: &str = "session.expired";
    pub const SESSION_ERROR: &str = "session.error";
    pub const BREAKER_OPEN: &str = "session.circuit_breaker.open";
    pub const BREAKER_HALF_OPEN: &str = "session.circuit_breaker.half_open";
    pub const RETRY_ATTEMPT: &str = "session.retry.attempt";
    pub const LOAD_TIME: &str = "session.load_time";
    pub const STORE_TIME: &str = "session.store_time";
    pub const ACTIVE_COUNT: &str = "session.active_count";
    pub const CACHE_HIT: &str = "session.cache.hit";
    pub const CACHE_MISS: &str = "session.cache.miss";
    pub const INVALIDATION_PARSE_ERROR: &str = "session.invalidation.parse_error";
}

/// Per-store metrics handle.
///
/// Cheap to clone; holds only the `store` tag value and the enablement flag.
#[derive(Debug, Clone)]
pub struct StoreMetrics {
    store: &'static str,
    enabled: bool,
}

impl StoreMetrics {
    /// Creates a handle tagged with the given store name.
    #[must_use]
    pub fn new(store: &'static str, backend: MetricsBackend) -> Self {
        Self {
            store,
            enabled: backend == MetricsBackend::Global,
        }
    }

    /// Handle that never emits, for tests and disabled configs.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            store: "none",
            enabled: false,
        }
    }

    /// Increments a counter by one.
    pub fn incr(&self, name: &'static str) {
        if self.enabled {
            metrics::counter!(name, "store" => self.store).increment(1);
        }
    }

    /// Increments `session.error` tagged with the error kind.
    pub fn error(&self, err: &SessionError) {
        if self.enabled {
            metrics::counter!(names::SESSION_ERROR, "store" => self.store, "error" => err.kind())
                .increment(1);
        }
    }

    /// Records a duration histogram sample.
    pub fn timing(&self, name: &'static str, elapsed: Duration) {
        if self.enabled {
            metrics::histogram!(name, "store" => self.store).record(elapsed.as_secs_f64());
        }
    }

    /// Sets the active-session gauge.
    pub fn set_active(&self, count: usize) {
        if self.enabled {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(names::ACTIVE_COUNT, "store" => self.store).set(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_handle_is_inert() {
        // No recorder installed in tests; the point is that these calls
        // never panic regardless of backend selection.
        let m = StoreMetrics::disabled();
        m.incr(names::SESSION_CREATED);
        m.error(&SessionError::CircuitOpen);
        m.timing(names::LOAD_TIME, Duration::from_millis(5));
        m.set_active(3);
    }

    #[test]
    fn global_handle_emits_without_recorder() {
        // The metrics facade no-ops when no recorder is installed.
        let m = StoreMetrics::new("memory", MetricsBackend::Global);
        m.incr(names::SESSION_LOADED);
        m.error(&SessionError::timeout("t"));
        m.timing(names::STORE_TIME, Duration::from_millis(1));
        m.set_active(0);
    }
}
