//! Store configuration and presets.
//!
//! A [`SessionConfig`] is assembled (optionally from a [`Preset`] patch),
//! validated once, and frozen behind an `Arc` before any store is
//! constructed. Re-configuration means building a new store; nothing mutates
//! a config after [`SessionConfig::validated`] returns.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use seshat_core::{SessionError, SessionResult};

/// Placeholder secret shipped in the defaults. Rejected whenever
/// `require_secure_secret` is set.
pub const PLACEHOLDER_SECRET: &str = "seshat-insecure-development-secret";

/// Minimum secret length (bytes) accepted under `require_secure_secret`.
pub const MIN_SECRET_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// MAC scheme used by the envelope writer.
///
/// Readers may additionally accept the legacy scheme while
/// `digest_fallback` is set, to allow rolling algorithm changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DigestAlgorithm {
    /// HMAC-SHA256 (current).
    HmacSha256,
    /// HMAC-SHA1 (legacy, read-only overlap).
    HmacSha1,
}

/// Where the metrics defined by this crate are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricsBackend {
    /// Emit through the globally installed `metrics` recorder.
    #[default]
    Global,
    /// Suppress all metric emission.
    Disabled,
}

/// Named bundles of configuration defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Development,
    Production,
    HighSecurity,
    Testing,
    Clustered,
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Retry policy knobs. See the resilience layer for semantics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts, including the first call. Must be >= 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
    /// Exponential growth factor per attempt.
    pub backoff_multiplier: f64,
    /// Fractional jitter, e.g. 0.1 for +/-10%.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Circuit breaker knobs. See the resilience layer for the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing.
    pub reset_timeout_ms: u64,
    /// Concurrent probe calls admitted while half-open.
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

/// Clustered decorator knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Whether the clustered decorator is in play at all.
    pub enabled: bool,
    /// This node's identity on the invalidation channel. Empty means
    /// "generate one at validation time".
    pub node_id: String,
    /// Pub/sub channel carrying invalidation messages.
    pub channel: String,
    /// Per-entry TTL for the local cache. 0 = no time expiry.
    pub local_cache_ttl_ms: u64,
    /// Maximum local cache cardinality. 0 disables caching.
    pub local_cache_max_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            node_id: String::new(),
            channel: "seshat:invalidations".to_string(),
            local_cache_ttl_ms: 30_000,
            local_cache_max_size: 10_000,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Full configuration surface for session stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Master key material for the envelope.
    pub secret: String,
    /// Reject the placeholder secret and secrets shorter than 32 bytes.
    pub require_secure_secret: bool,
    /// Default session lifetime in milliseconds.
    pub timeout_ms: u64,
    /// Cookie name used by middleware collaborators.
    pub session_key: String,
    /// If true, every load re-arms the expiry window.
    pub sliding_expiration: bool,

    /// Derive the symmetric key with PBKDF2-HMAC-SHA256.
    pub use_kdf: bool,
    /// PBKDF2 iteration count.
    pub kdf_iterations: u32,
    /// Stored KDF salt. Empty means "generate per envelope".
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kdf_salt: Option<Vec<u8>>,

    /// Current MAC scheme for envelope writers.
    pub digest_algorithm: DigestAlgorithm,
    /// Accept the legacy MAC scheme on read for one overlap period.
    pub digest_fallback: bool,
    /// Encrypt envelope bodies before they reach the remote store.
    pub encrypt_at_rest: bool,

    /// Deflate payloads larger than `compression_threshold`.
    pub compress_data: bool,
    /// Plaintext size in bytes above which compression kicks in.
    pub compression_threshold: usize,

    /// Include the client IP in the fingerprint.
    pub bind_to_ip: bool,
    /// Include the user agent in the fingerprint.
    pub bind_to_user_agent: bool,

    /// Retry remote calls classified as transient.
    pub enable_retry: bool,
    /// Retry policy knobs.
    pub retry: RetryConfig,
    /// Interpose a circuit breaker on remote calls.
    pub circuit_breaker_enabled: bool,
    /// Breaker knobs.
    pub circuit_breaker: BreakerConfig,

    /// Clustered decorator knobs.
    pub cluster: ClusterConfig,

    /// Metric sink selection.
    pub metrics_backend: MetricsBackend,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: PLACEHOLDER_SECRET.to_string(),
            require_secure_secret: false,
            timeout_ms: 60 * 60 * 1000,
            session_key: "_session".to_string(),
            sliding_expiration: false,
            use_kdf: false,
            kdf_iterations: 100_000,
            kdf_salt: None,
            digest_algorithm: DigestAlgorithm::HmacSha256,
            digest_fallback: false,
            encrypt_at_rest: true,
            compress_data: true,
            compression_threshold: 1_024,
            bind_to_ip: false,
            bind_to_user_agent: false,
            enable_retry: true,
            retry: RetryConfig::default(),
            circuit_breaker_enabled: true,
            circuit_breaker: BreakerConfig::default(),
            cluster: ClusterConfig::default(),
            metrics_backend: MetricsBackend::Global,
        }
    }
}

impl SessionConfig {
    /// Applies a preset patch over this config and returns the result.
    ///
    /// Pure function: `self` is the base, the preset overrides its slice of
    /// options, nothing else changes.
    #[must_use]
    pub fn with_preset(mut self, preset: Preset) -> Self {
        match preset {
            Preset::Development => {
                self.require_secure_secret = false;
                self.encrypt_at_rest = false;
                self.compress_data = false;
                self.enable_retry = false;
                self.circuit_breaker_enabled = false;
            }
            Preset::Production => {
                self.require_secure_secret = true;
                self.encrypt_at_rest = true;
                self.use_kdf = true;
                self.compress_data = true;
                self.enable_retry = true;
                self.circuit_breaker_enabled = true;
            }
            Preset::HighSecurity => {
                self = self.with_preset(Preset::Production);
                self.timeout_ms = 15 * 60 * 1000;
                self.kdf_iterations = 200_000;
                self.digest_fallback = false;
                self.bind_to_ip = true;
                self.bind_to_user_agent = true;
                self.sliding_expiration = false;
            }
            Preset::Testing => {
                self.require_secure_secret = false;
                self.timeout_ms = 60 * 1000;
                self.encrypt_at_rest = false;
                self.compress_data = false;
                self.enable_retry = false;
                self.circuit_breaker_enabled = false;
                self.cluster.local_cache_ttl_ms = 1_000;
                self.metrics_backend = MetricsBackend::Disabled;
            }
            Preset::Clustered => {
                self = self.with_preset(Preset::Production);
                self.cluster.enabled = true;
            }
        }
        self
    }

    /// Validates the config and freezes it behind an `Arc`.
    ///
    /// Fills in a generated cluster node id when clustering is enabled and
    /// none was configured.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for an inconsistent config, or `Encryption` when
    /// the secret fails the secure-secret policy (unusable key material).
    pub fn validated(mut self) -> SessionResult<Arc<Self>> {
        if self.require_secure_secret {
            if self.secret == PLACEHOLDER_SECRET {
                return Err(SessionError::Encryption {
                    reason: "placeholder secret rejected by require_secure_secret".to_string(),
                });
            }
            if self.secret.len() < MIN_SECRET_LEN {
                return Err(SessionError::Encryption {
                    reason: format!(
                        "secret shorter than {MIN_SECRET_LEN} bytes rejected by require_secure_secret"
                    ),
                });
            }
        }
        if self.secret.is_empty() {
            return Err(SessionError::Encryption {
                reason: "empty secret".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(SessionError::Validation {
                reason: "timeout must be positive".to_string(),
            });
        }
        if self.session_key.is_empty() {
            return Err(SessionError::Validation {
                reason: "session_key must not be empty".to_string(),
            });
        }
        if self.use_kdf && self.kdf_iterations == 0 {
            return Err(SessionError::Validation {
                reason: "kdf_iterations must be positive".to_string(),
            });
        }
        if self.enable_retry {
            let r = &self.retry;
            if r.max_attempts == 0 {
                return Err(SessionError::Validation {
                    reason: "retry.max_attempts must be >= 1".to_string(),
                });
            }
            if r.backoff_multiplier < 1.0 || !(0.0..1.0).contains(&r.jitter) {
                return Err(SessionError::Validation {
                    reason: "retry backoff_multiplier must be >= 1.0 and jitter in [0, 1)"
                        .to_string(),
                });
            }
        }
        if self.circuit_breaker_enabled {
            let b = &self.circuit_breaker;
            if b.failure_threshold == 0 || b.half_open_max_calls == 0 {
                return Err(SessionError::Validation {
                    reason: "breaker thresholds must be >= 1".to_string(),
                });
            }
        }
        if self.cluster.enabled {
            if self.cluster.channel.is_empty() {
                return Err(SessionError::Validation {
                    reason: "cluster.channel must not be empty".to_string(),
                });
            }
            if self.cluster.node_id.is_empty() {
                self.cluster.node_id = uuid::Uuid::new_v4().to_string();
            }
        }
        Ok(Arc::new(self))
    }
}
