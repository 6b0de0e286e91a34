//! Session record: fixed header + user payload.
//!
//! The header travels with the payload everywhere (memory, cache, envelope).
//! Invariants: `created_at_ms <= expires_at_ms`, the id is URL-safe and at
//! least 16 chars, and a record is valid exactly while `now < expires_at_ms`.

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};
use crate::id;

/// A session record: identity, lifetime window, optional client binding,
/// and the application payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord<T> {
    /// Opaque URL-safe identifier, stable until explicit regeneration.
    pub session_id: String,
    /// Wall-clock creation time, millis since epoch.
    pub created_at_ms: u64,
    /// Absolute expiry, millis since epoch. `created_at_ms + timeout` on
    /// creation; reset by `touch`.
    pub expires_at_ms: u64,
    /// Hash of selected request attributes binding the session to a client.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fingerprint: Option<String>,
    /// Application payload.
    pub data: T,
}

impl<T> SessionRecord<T> {
    /// Creates a record with a freshly generated id.
    ///
    /// Expiry is `now_ms + timeout_ms`.
    #[must_use]
    pub fn new(data: T, now_ms: u64, timeout_ms: u64) -> Self {
        Self {
            session_id: id::generate(),
            created_at_ms: now_ms,
            expires_at_ms: now_ms + timeout_ms,
            fingerprint: None,
            data,
        }
    }

    /// Checks header invariants.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the id is malformed or the lifetime window
    /// is inverted.
    pub fn validate(&self) -> SessionResult<()> {
        id::validate(&self.session_id)?;
        if self.created_at_ms > self.expires_at_ms {
            return Err(SessionError::Validation {
                reason: format!(
                    "created_at ({}) after expires_at ({})",
                    self.created_at_ms, self.expires_at_ms
                ),
            });
        }
        Ok(())
    }

    /// A record is valid while `now < expires_at_ms`.
    #[must_use]
    pub fn is_valid(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }

    /// Remaining lifetime in milliseconds; zero once expired.
    #[must_use]
    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at_ms.saturating_sub(now_ms)
    }

    /// Resets the expiry window to `now_ms + timeout_ms`.
    pub fn touch(&mut self, now_ms: u64, timeout_ms: u64) {
        self.expires_at_ms = now_ms + timeout_ms;
    }

    /// Replaces the id with a freshly generated one, returning the old id.
    pub fn regenerate_id(&mut self) -> String {
        std::mem::replace(&mut self.session_id, id::generate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(now: u64, timeout: u64) -> SessionRecord<u32> {
        SessionRecord::new(7, now, timeout)
    }

    #[test]
    fn new_record_is_valid_until_expiry() {
        let rec = record(1_000, 500);
        assert!(rec.validate().is_ok());
        assert!(rec.is_valid(1_000));
        assert!(rec.is_valid(1_499));
        assert!(!rec.is_valid(1_500));
        assert!(!rec.is_valid(2_000));
    }

    #[test]
    fn remaining_lifetime_saturates_at_zero() {
        let rec = record(1_000, 500);
        assert_eq!(rec.remaining_ms(1_000), 500);
        assert_eq!(rec.remaining_ms(1_400), 100);
        assert_eq!(rec.remaining_ms(9_999), 0);
    }

    #[test]
    fn touch_resets_expiry() {
        let mut rec = record(1_000, 500);
        rec.touch(1_400, 500);
        assert_eq!(rec.expires_at_ms, 1_900);
        assert!(rec.is_valid(1_800));
    }

    #[test]
    fn regenerate_id_returns_previous() {
        let mut rec = record(1_000, 500);
        let before = rec.session_id.clone();
        let old = rec.regenerate_id();
        assert_eq!(old, before);
        assert_ne!(rec.session_id, before);
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn inverted_window_fails_validation() {
        let mut rec = record(1_000, 500);
        rec.created_at_ms = 2_000;
        let err = rec.validate().unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn serde_round_trip_preserves_header() {
        let mut rec = record(1_000, 500);
        rec.fingerprint = Some("abc123".to_string());
        let json = serde_json::to_string(&rec).unwrap();
        let back: SessionRecord<u32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
