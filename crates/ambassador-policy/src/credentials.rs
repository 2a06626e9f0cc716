//! `Authorization` header parsing.
//!
//! Both schemes are matched case-insensitively and require a single space
//! between the scheme and its payload, as the proxy forwards the header
//! verbatim.

use base64::{Engine, engine::general_purpose::STANDARD};

/// Decoded `Basic` credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Strip `scheme` followed by one space, ignoring ASCII case.
fn strip_scheme<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let bytes = header.as_bytes();
    if bytes.len() <= scheme.len()
        || bytes[scheme.len()] != b' '
        || !bytes[..scheme.len()].eq_ignore_ascii_case(scheme.as_bytes())
    {
        return None;
    }
    header.get(scheme.len() + 1..)
}

/// Parse a `Basic <base64(user:pass)>` header.
///
/// The username must be non-empty and cannot contain `:`; the password must be
/// non-empty and may contain `:`. Returns `None` for anything else, including
/// invalid base64 and non-UTF-8 credentials.
#[must_use]
pub fn parse_basic(header: &str) -> Option<BasicCredentials> {
    let encoded = strip_scheme(header, "basic")?;
    if encoded.is_empty() {
        return None;
    }

    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;

    let (username, password) = decoded.split_once(':')?;
    if username.is_empty() || password.is_empty() {
        return None;
    }

    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Parse a `Bearer <token>` header, returning the token.
#[must_use]
pub fn parse_bearer(header: &str) -> Option<&str> {
    strip_scheme(header, "bearer").filter(|token| !token.is_empty())
}
