//! Policy loading error types.
//!
//! Errors here never reach a request: the decision path maps every input to a
//! [`Verdict`](crate::Verdict). They are surfaced to operators through logs and
//! to embedders through [`PolicySource::reload`](crate::PolicySource::reload).

use std::fmt;
use std::path::PathBuf;

/// Errors that can occur while reading or parsing a policy document.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The document does not have the expected shape (not a JSON array,
    /// a required field is missing, a field has the wrong type).
    ///
    /// A structural error rejects the whole document.
    #[error("Invalid policy document: {message}")]
    Structure {
        /// Description of the structural problem.
        message: String,
    },

    /// The policy file could not be read.
    #[error("Failed to read policy file {}: {source}", path.display())]
    Io {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl PolicyError {
    /// Creates a new `Structure` error.
    #[must_use]
    pub fn structure(message: impl Into<String>) -> Self {
        Self::Structure {
            message: message.into(),
        }
    }

    /// Creates a new `Io` error for the given path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the document itself was rejected, as opposed to the
    /// file being unreadable.
    #[must_use]
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Structure { .. })
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        Self::structure(err.to_string())
    }
}

/// Result alias for policy loading.
pub type PolicyResult<T> = Result<T, PolicyError>;

// =============================================================================
// Validation Issues
// =============================================================================

/// What was dropped while compiling a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// A host pattern failed to compile; the whole host entry was dropped.
    HostPattern,
    /// A bearer token `allowed_paths` entry failed to compile.
    BearerPath,
    /// A bearer token was left without any usable path and was dropped.
    TokenDropped,
    /// The same bearer token was declared twice for one host; the last usable
    /// declaration replaces the earlier one.
    DuplicateToken,
    /// A basic auth `allowed_paths` entry failed to compile.
    BasicPath,
    /// A no-auth path failed to compile.
    NoAuthPath,
}

impl IssueKind {
    /// Short machine-friendly label, used as a structured log field.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPattern => "host_pattern",
            Self::BearerPath => "bearer_path",
            Self::TokenDropped => "token_dropped",
            Self::DuplicateToken => "duplicate_token",
            Self::BasicPath => "basic_path",
            Self::NoAuthPath => "no_auth_path",
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A localized problem found while compiling a document.
///
/// Issues never reject the document; they record what was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Host pattern (as written) of the entry the issue belongs to.
    pub host: String,
    /// What was dropped.
    pub kind: IssueKind,
    /// The offending pattern or token label.
    pub subject: String,
    /// Human-readable detail (usually the regex compile error).
    pub message: String,
}

impl ValidationIssue {
    pub(crate) fn new(
        host: &str,
        kind: IssueKind,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            host: host.to_string(),
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "host '{}': {} '{}': {}",
            self.host, self.kind, self.subject, self.message
        )
    }
}
