//! Session cookie rendering.
//!
//! The HTTP middleware itself lives outside this crate; this module only
//! renders the `Set-Cookie` value it writes: a single cookie named by
//! `session_key` whose value is the base64url-encoded envelope, with the
//! attribute set fixed by the session contract (`HttpOnly`, `Secure` on TLS,
//! `SameSite=Lax` by default, `Path=/`, request-host `Domain`, `Max-Age` =
//! remaining lifetime).

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SameSite {
    /// Sent on top-level navigations; the safest broadly-compatible default.
    #[default]
    Lax,
    /// Never sent cross-site.
    Strict,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lax => f.write_str("Lax"),
            Self::Strict => f.write_str("Strict"),
        }
    }
}

/// Attributes for one rendered session cookie.
#[derive(Debug, Clone)]
pub struct CookieOptions<'a> {
    /// Cookie name (the configured `session_key`).
    pub name: &'a str,
    /// Request hostname, used as the `Domain` attribute.
    pub domain: &'a str,
    /// Whether the request arrived over TLS (`Secure` attribute).
    pub secure: bool,
    /// `SameSite` policy.
    pub same_site: SameSite,
    /// Remaining session lifetime in milliseconds (`Max-Age`, rounded down
    /// to whole seconds).
    pub remaining_ms: u64,
}

/// Renders a `Set-Cookie` header value carrying the envelope.
#[must_use]
pub fn build_set_cookie(envelope: &[u8], opts: &CookieOptions<'_>) -> String {
    let value = URL_SAFE_NO_PAD.encode(envelope);
    let mut cookie = format!(
        "{}={value}; Max-Age={}; Domain={}; Path=/; HttpOnly; SameSite={}",
        opts.name,
        opts.remaining_ms / 1_000,
        opts.domain,
        opts.same_site,
    );
    if opts.secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Decodes a cookie value back into envelope bytes.
#[must_use]
pub fn decode_cookie_value(value: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(secure: bool, same_site: SameSite) -> CookieOptions<'static> {
        CookieOptions {
            name: "_session",
            domain: "app.example.com",
            secure,
            same_site,
            remaining_ms: 90_500,
        }
    }

    #[test]
    fn renders_all_attributes() {
        let cookie = build_set_cookie(b"envelope-bytes", &opts(true, SameSite::Lax));
        assert!(cookie.starts_with("_session="));
        assert!(cookie.contains("; Max-Age=90"));
        assert!(cookie.contains("; Domain=app.example.com"));
        assert!(cookie.contains("; Path=/"));
        assert!(cookie.contains("; HttpOnly"));
        assert!(cookie.contains("; SameSite=Lax"));
        assert!(cookie.ends_with("; Secure"));
    }

    #[test]
    fn secure_omitted_without_tls() {
        let cookie = build_set_cookie(b"x", &opts(false, SameSite::Strict));
        assert!(!cookie.contains("Secure"));
        assert!(cookie.contains("; SameSite=Strict"));
    }

    #[test]
    fn value_round_trips_base64url() {
        let envelope = vec![0u8, 255, 7, 42, 128];
        let cookie = build_set_cookie(&envelope, &opts(true, SameSite::Lax));
        let value = cookie
            .split_once('=')
            .and_then(|(_, rest)| rest.split_once(';'))
            .map(|(v, _)| v)
            .unwrap();
        assert_eq!(decode_cookie_value(value).unwrap(), envelope);
    }
}
