//! Decision outcomes.

use std::fmt;

/// `WWW-Authenticate` value sent with [`Verdict::BasicAuthRequired`].
pub const BASIC_CHALLENGE: &str = r#"Basic realm="basic authentication required""#;

/// `WWW-Authenticate` value sent with [`Verdict::BearerHeaderMissing`].
pub const BEARER_CHALLENGE: &str = r#"Bearer realm="token_required""#;

/// `WWW-Authenticate` value sent with [`Verdict::BearerTokenUnknown`].
pub const BEARER_INVALID_TOKEN: &str = r#"Bearer realm="token_required" error="invalid_token""#;

/// `WWW-Authenticate` value sent with [`Verdict::BearerPathDenied`].
pub const BEARER_NOT_ALLOWED: &str = r#"Bearer realm="token_required" error="not_allowed""#;

/// The outcome of evaluating one request against a policy document.
///
/// Each variant maps to exactly one status code and challenge header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    /// No host policy matches the request host.
    DomainDenied,
    /// The path is exempt from credentials.
    NoAuthGranted,
    /// The path is basic-auth guarded and the credentials are missing or wrong.
    BasicAuthRequired,
    /// The path is basic-auth guarded and the credentials are valid.
    BasicAuthGranted,
    /// The path is bearer guarded and no `Authorization` header was sent.
    BearerHeaderMissing,
    /// The header is not a bearer token, or the token is unknown for the host.
    BearerTokenUnknown,
    /// The token is known but may not access the path.
    BearerPathDenied,
    /// The token may access the path.
    BearerPathGranted,
}

impl Verdict {
    /// Whether the request may proceed.
    #[must_use]
    pub fn is_granted(self) -> bool {
        matches!(
            self,
            Self::NoAuthGranted | Self::BasicAuthGranted | Self::BearerPathGranted
        )
    }

    /// HTTP status code for this verdict.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::NoAuthGranted | Self::BasicAuthGranted | Self::BearerPathGranted => 200,
            Self::BasicAuthRequired | Self::BearerHeaderMissing | Self::BearerTokenUnknown => 401,
            Self::DomainDenied | Self::BearerPathDenied => 403,
        }
    }

    /// `WWW-Authenticate` challenge for this verdict, if any.
    #[must_use]
    pub fn www_authenticate(self) -> Option<&'static str> {
        match self {
            Self::BasicAuthRequired => Some(BASIC_CHALLENGE),
            Self::BearerHeaderMissing => Some(BEARER_CHALLENGE),
            Self::BearerTokenUnknown => Some(BEARER_INVALID_TOKEN),
            Self::BearerPathDenied => Some(BEARER_NOT_ALLOWED),
            Self::DomainDenied
            | Self::NoAuthGranted
            | Self::BasicAuthGranted
            | Self::BearerPathGranted => None,
        }
    }

    /// Error reason reported to the caller, `None` when granted.
    #[must_use]
    pub fn reason(self) -> Option<&'static str> {
        match self {
            Self::DomainDenied => Some("domain not allowed"),
            Self::BasicAuthRequired => Some("basic authentication required"),
            Self::BearerHeaderMissing => Some("missing Header: authorization"),
            Self::BearerTokenUnknown => Some("token mismatch"),
            Self::BearerPathDenied => Some("path not allowed"),
            Self::NoAuthGranted | Self::BasicAuthGranted | Self::BearerPathGranted => None,
        }
    }

    /// Stable label, used as a structured log field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DomainDenied => "domain_denied",
            Self::NoAuthGranted => "no_auth_granted",
            Self::BasicAuthRequired => "basic_auth_required",
            Self::BasicAuthGranted => "basic_auth_granted",
            Self::BearerHeaderMissing => "bearer_header_missing",
            Self::BearerTokenUnknown => "bearer_token_unknown",
            Self::BearerPathDenied => "bearer_path_denied",
            Self::BearerPathGranted => "bearer_path_granted",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
