//! Invalidation channel wire messages.
//!
//! One JSON object per event:
//! `{"v":1,"event":"deleted","id":"…","old_id":"…","node":"…","ts":1700000000000}`.
//! Unknown fields are ignored on decode; unknown event names decode to
//! [`InvalidationEvent::Unknown`] so receivers can log and skip them without
//! tearing down the subscriber.

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

/// Current wire format version.
pub const WIRE_VERSION: u32 = 1;

/// Kind of session mutation being fanned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationEvent {
    Created,
    Updated,
    Deleted,
    Regenerated,
    /// Any event name this build does not recognize. Logged and skipped.
    #[serde(other)]
    Unknown,
}

/// A single fan-out invalidation. One-shot, best-effort; never queued or
/// replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Wire format version.
    pub v: u32,
    /// What happened to the session.
    pub event: InvalidationEvent,
    /// The affected session id.
    pub id: String,
    /// Previous id, present only for `regenerated`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub old_id: Option<String>,
    /// Originating node. Receivers drop messages from themselves.
    pub node: String,
    /// Emission time, unix millis.
    pub ts: u64,
}

impl InvalidationMessage {
    /// Builds a message for a single-id event.
    #[must_use]
    pub fn new(
        event: InvalidationEvent,
        id: impl Into<String>,
        node: impl Into<String>,
        ts: u64,
    ) -> Self {
        Self {
            v: WIRE_VERSION,
            event,
            id: id.into(),
            old_id: None,
            node: node.into(),
            ts,
        }
    }

    /// Builds a `regenerated` message carrying both ids.
    #[must_use]
    pub fn regenerated(
        old_id: impl Into<String>,
        new_id: impl Into<String>,
        node: impl Into<String>,
        ts: u64,
    ) -> Self {
        Self {
            v: WIRE_VERSION,
            event: InvalidationEvent::Regenerated,
            id: new_id.into(),
            old_id: Some(old_id.into()),
            node: node.into(),
            ts,
        }
    }

    /// Whether this message originated on the given node (loopback).
    #[must_use]
    pub fn is_from(&self, node_id: &str) -> bool {
        self.node == node_id
    }

    /// Serializes to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns `Validation` if serialization fails (practically unreachable
    /// for this struct).
    pub fn to_bytes(&self) -> SessionResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SessionError::Validation {
            reason: format!("invalidation encode: {e}"),
        })
    }

    /// Parses a message from the JSON wire form, ignoring unknown fields.
    ///
    /// # Errors
    ///
    /// Returns `Corruption` on malformed JSON. Unknown event names are NOT an
    /// error; they surface as [`InvalidationEvent::Unknown`].
    pub fn from_bytes(bytes: &[u8]) -> SessionResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::Corruption {
            reason: format!("invalidation decode: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: &InvalidationMessage) {
        let bytes = msg.to_bytes().expect("serialize failed");
        let decoded = InvalidationMessage::from_bytes(&bytes).expect("deserialize failed");
        assert_eq!(msg, &decoded);
    }

    #[test]
    fn serde_deleted_round_trip() {
        round_trip(&InvalidationMessage::new(
            InvalidationEvent::Deleted,
            "abcdefghijklmnop",
            "node-1",
            1_700_000_000_000,
        ));
    }

    #[test]
    fn serde_regenerated_round_trip() {
        round_trip(&InvalidationMessage::regenerated(
            "old-id-abcdefghi",
            "new-id-abcdefghi",
            "node-2",
            1_700_000_000_001,
        ));
    }

    #[test]
    fn event_names_match_wire_contract() {
        let msg = InvalidationMessage::new(
            InvalidationEvent::Updated,
            "abcdefghijklmnop",
            "node-1",
            42,
        );
        let json = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"event\":\"updated\""));
        assert!(json.contains("\"v\":1"));
        assert!(json.contains("\"node\":\"node-1\""));
        // old_id is omitted when absent.
        assert!(!json.contains("old_id"));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let raw = br#"{"v":1,"event":"deleted","id":"abcdefghijklmnop","node":"n1","ts":5,"shard":9,"extra":"x"}"#;
        let msg = InvalidationMessage::from_bytes(raw).unwrap();
        assert_eq!(msg.event, InvalidationEvent::Deleted);
        assert_eq!(msg.id, "abcdefghijklmnop");
    }

    #[test]
    fn unknown_event_decodes_to_unknown() {
        let raw = br#"{"v":1,"event":"compacted","id":"abcdefghijklmnop","node":"n1","ts":5}"#;
        let msg = InvalidationMessage::from_bytes(raw).unwrap();
        assert_eq!(msg.event, InvalidationEvent::Unknown);
    }

    #[test]
    fn malformed_json_is_corruption() {
        let err = InvalidationMessage::from_bytes(b"{oops").unwrap_err();
        assert_eq!(err.kind(), "corruption");
    }

    #[test]
    fn loopback_check() {
        let msg = InvalidationMessage::new(
            InvalidationEvent::Created,
            "abcdefghijklmnop",
            "node-a",
            1,
        );
        assert!(msg.is_from("node-a"));
        assert!(!msg.is_from("node-b"));
    }
}
