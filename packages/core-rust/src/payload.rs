//! Payload capability trait.
//!
//! Stores are parameterized over an application-defined payload type. The
//! capability surface is deliberately small: JSON encode/decode plus an
//! authentication predicate. Encoding goes through serde without any runtime
//! reflection on the hot path.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{SessionError, SessionResult};

/// Capability contract for session payload types.
///
/// Any `Serialize + DeserializeOwned` type qualifies; implementors only add
/// the [`is_authenticated`](SessionPayload::is_authenticated) predicate.
/// The provided `encode`/`decode` methods are the single serialization point
/// for payload bytes, so the envelope layer never touches serde directly.
pub trait SessionPayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Whether this payload represents an authenticated principal.
    fn is_authenticated(&self) -> bool;

    /// Encodes the payload to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `Validation` when the payload cannot be represented as JSON.
    fn encode(&self) -> SessionResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| SessionError::Validation {
            reason: format!("payload encode: {e}"),
        })
    }

    /// Decodes a payload from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `Corruption`: bytes that reach this point came out of storage
    /// or an authenticated envelope, so a parse failure means damaged data.
    fn decode(bytes: &[u8]) -> SessionResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::Corruption {
            reason: format!("payload decode: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct UserData {
        user_id: Option<u64>,
        theme: String,
    }

    impl SessionPayload for UserData {
        fn is_authenticated(&self) -> bool {
            self.user_id.is_some()
        }
    }

    #[test]
    fn encode_decode_round_trip() {
        let data = UserData {
            user_id: Some(42),
            theme: "dark".to_string(),
        };
        let bytes = data.encode().unwrap();
        let back = UserData::decode(&bytes).unwrap();
        assert_eq!(back, data);
        assert!(back.is_authenticated());
    }

    #[test]
    fn decode_garbage_is_corruption() {
        let err = UserData::decode(b"{not json").unwrap_err();
        assert_eq!(err.kind(), "corruption");
    }

    #[test]
    fn anonymous_payload_is_not_authenticated() {
        let data = UserData {
            user_id: None,
            theme: "light".to_string(),
        };
        assert!(!data.is_authenticated());
    }
}
