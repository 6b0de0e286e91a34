//! Session identifier generation and validation.
//!
//! Ids are opaque, URL-safe strings matching `[A-Za-z0-9_-]{16,}`. Generated
//! ids carry 192 bits of entropy encoded as 32 base64url characters.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::error::{SessionError, SessionResult};

/// Minimum accepted id length.
pub const MIN_ID_LEN: usize = 16;

/// Number of random bytes behind a generated id (192 bits).
const ID_ENTROPY_BYTES: usize = 24;

/// Generates a fresh session id: 24 random bytes, base64url, 32 chars.
#[must_use]
pub fn generate() -> String {
    let mut bytes = [0u8; ID_ENTROPY_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Checks that `id` matches `[A-Za-z0-9_-]{16,}`.
#[must_use]
pub fn is_valid(id: &str) -> bool {
    id.len() >= MIN_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Validates `id`, returning a [`SessionError::Validation`] on mismatch.
///
/// # Errors
///
/// Returns `Validation` if the id is shorter than [`MIN_ID_LEN`] or contains
/// characters outside the URL-safe alphabet.
pub fn validate(id: &str) -> SessionResult<()> {
    if is_valid(id) {
        Ok(())
    } else {
        Err(SessionError::Validation {
            reason: format!("invalid session id: {id:?}"),
        })
    }
}
