//! Client fingerprinting.
//!
//! The fingerprint is a SHA-256 over the request attributes selected by
//! `bind_to_ip` / `bind_to_user_agent`, hex-encoded. Middleware
//! collaborators compute it from the incoming request and verify it against
//! the loaded record; a mismatch is a `Binding` failure, handled like
//! corruption for safety.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use seshat_core::{SessionError, SessionResult};

use crate::config::SessionConfig;

/// Request attributes a fingerprint can bind to.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintSource<'a> {
    /// Client address as seen by the server.
    pub ip: Option<&'a str>,
    /// `User-Agent` header value.
    pub user_agent: Option<&'a str>,
}

/// Computes the fingerprint for the attributes the config binds to.
///
/// Returns `None` when binding is disabled entirely.
#[must_use]
pub fn compute(config: &SessionConfig, source: &FingerprintSource<'_>) -> Option<String> {
    if !config.bind_to_ip && !config.bind_to_user_agent {
        return None;
    }
    let mut hasher = Sha256::new();
    if config.bind_to_ip {
        hasher.update(source.ip.unwrap_or_default().as_bytes());
        hasher.update([0u8]);
    }
    if config.bind_to_user_agent {
        hasher.update(source.user_agent.unwrap_or_default().as_bytes());
        hasher.update([0u8]);
    }
    Some(hex::encode(hasher.finalize()))
}

/// Verifies a stored fingerprint against the current request.
///
/// A record without a fingerprint always passes (binding was off when it
/// was created). Comparison is constant-time.
///
/// # Errors
///
/// `Binding` when the stored fingerprint does not match the one computed
/// from the current request.
pub fn verify(
    stored: Option<&str>,
    config: &SessionConfig,
    source: &FingerprintSource<'_>,
) -> SessionResult<()> {
    let Some(stored) = stored else {
        return Ok(());
    };
    let computed = compute(config, source).unwrap_or_default();
    if bool::from(stored.as_bytes().ct_eq(computed.as_bytes())) {
        Ok(())
    } else {
        Err(SessionError::Binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ip: bool, ua: bool) -> SessionConfig {
        SessionConfig {
            bind_to_ip: ip,
            bind_to_user_agent: ua,
            ..SessionConfig::default()
        }
    }

    #[test]
    fn disabled_binding_yields_no_fingerprint() {
        let source = FingerprintSource {
            ip: Some("10.0.0.1"),
            user_agent: Some("curl/8"),
        };
        assert!(compute(&config(false, false), &source).is_none());
    }

    #[test]
    fn fingerprint_depends_on_selected_attributes() {
        let source_a = FingerprintSource {
            ip: Some("10.0.0.1"),
            user_agent: Some("curl/8"),
        };
        let source_b = FingerprintSource {
            ip: Some("10.0.0.2"),
            user_agent: Some("curl/8"),
        };

        let ip_bound = config(true, false);
        assert_ne!(
            compute(&ip_bound, &source_a),
            compute(&ip_bound, &source_b)
        );

        // Unbound attribute changes do not affect the fingerprint.
        let ua_bound = config(false, true);
        assert_eq!(
            compute(&ua_bound, &source_a),
            compute(&ua_bound, &source_b)
        );
    }

    #[test]
    fn verify_passes_matching_client() {
        let cfg = config(true, true);
        let source = FingerprintSource {
            ip: Some("10.0.0.1"),
            user_agent: Some("curl/8"),
        };
        let fingerprint = compute(&cfg, &source).unwrap();
        assert!(verify(Some(&fingerprint), &cfg, &source).is_ok());
    }

    #[test]
    fn verify_rejects_different_client() {
        let cfg = config(true, true);
        let original = FingerprintSource {
            ip: Some("10.0.0.1"),
            user_agent: Some("curl/8"),
        };
        let hijacker = FingerprintSource {
            ip: Some("203.0.113.9"),
            user_agent: Some("curl/8"),
        };
        let fingerprint = compute(&cfg, &original).unwrap();
        let err = verify(Some(&fingerprint), &cfg, &hijacker).unwrap_err();
        assert_eq!(err.kind(), "binding");
    }

    #[test]
    fn unbound_record_always_passes() {
        let cfg = config(true, true);
        let source = FingerprintSource::default();
        assert!(verify(None, &cfg, &source).is_ok());
    }
}
