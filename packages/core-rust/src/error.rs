//! Session error model.
//!
//! Every fallible operation in the store stack surfaces one of the kinds
//! defined here. The kinds are part of the public contract: middleware
//! collaborators branch on them (a corrupt or expired session becomes a fresh
//! one, a storage fault degrades gracefully), and the resilience layer uses
//! [`SessionError::is_retryable`] to decide whether a failed remote call may
//! be re-attempted.

use thiserror::Error;

/// Classification of a transient storage fault.
///
/// Only these faults are considered retryable by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// TCP connection refused.
    ConnectionRefused,
    /// Deadline exceeded while waiting on the backing store.
    Timeout,
    /// Transient name-resolution failure.
    Dns,
    /// Connection reset by peer.
    ConnectionReset,
    /// Any other backing-store fault. Not retryable.
    Other,
}

impl TransientKind {
    /// Whether a fault of this kind may be retried.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Error kinds surfaced by session stores.
///
/// `Corruption` and `NotFound` are mutually exclusive: a record that exists
/// but cannot be decoded is corrupt, never missing.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No record exists for the id.
    #[error("session not found: {id}")]
    NotFound {
        /// The id that was looked up.
        id: String,
    },

    /// A record exists but its expiry has passed.
    #[error("session expired: {id}")]
    Expired {
        /// The id of the expired record.
        id: String,
    },

    /// Input violates id or payload constraints.
    #[error("validation failed: {reason}")]
    Validation {
        /// Human-readable description of the violated constraint.
        reason: String,
    },

    /// Envelope MAC, decryption, decompression, or payload parse failure.
    #[error("session data corrupt: {reason}")]
    Corruption {
        /// What failed while decoding.
        reason: String,
    },

    /// Client fingerprint mismatch on load. Treated like corruption.
    #[error("client fingerprint mismatch")]
    Binding,

    /// Transient backing-store failure.
    #[error("storage failure ({kind:?}): {reason}")]
    Storage {
        /// Transient-fault classification for the retry policy.
        kind: TransientKind,
        /// Underlying fault description.
        reason: String,
    },

    /// Irrecoverable cryptographic failure (e.g. unusable key material).
    #[error("encryption failure: {reason}")]
    Encryption {
        /// What made the crypto layer unusable.
        reason: String,
    },

    /// Fast failure from an open circuit breaker.
    #[error("circuit breaker open")]
    CircuitOpen,
}

impl SessionError {
    /// Short stable tag for this error kind, used as the `error` metric tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Expired { .. } => "expired",
            Self::Validation { .. } => "validation",
            Self::Corruption { .. } => "corruption",
            Self::Binding => "binding",
            Self::Storage { .. } => "storage",
            Self::Encryption { .. } => "encryption",
            Self::CircuitOpen => "circuit_open",
        }
    }

    /// Whether the retry policy may re-attempt the failed call.
    ///
    /// Only transient storage faults qualify. Authentication, serialization,
    /// validation, and corruption failures never retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage { kind, .. } => kind.is_retryable(),
            _ => false,
        }
    }

    /// Convenience constructor for a retryable timeout fault.
    #[must_use]
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Storage {
            kind: TransientKind::Timeout,
            reason: reason.into(),
        }
    }

    /// Convenience constructor for a non-retryable storage fault.
    #[must_use]
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            kind: TransientKind::Other,
            reason: reason.into(),
        }
    }
}

/// Result alias used across the store stack.
pub type SessionResult<T> = Result<T, SessionError>;
