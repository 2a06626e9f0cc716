//! The current policy document and how it is replaced.
//!
//! [`PolicySource`] owns the pointer to the document every request reads. Reads
//! are a single atomic load; a reload builds the next document off to the side
//! and swaps it in, so readers never see a half-built policy and never wait for
//! the reloader.
//!
//! Failure handling differs between the first load and later reloads:
//!
//! - first load fails: serve [`PolicyDocument::deny_all`] until a reload works,
//! - reload fails: keep serving the last document that loaded.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use tracing::{error, info, warn};

use crate::document::PolicyDocument;
use crate::error::{PolicyError, PolicyResult, ValidationIssue};
use crate::loader::{LoadedPolicy, parse_policy};
use crate::watcher::{self, WatcherConfig, WatcherError, WatcherHandle};

/// Where the policy document comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum PolicyOrigin {
    /// JSON text supplied directly (e.g. from an environment variable).
    Inline(String),
    /// A JSON file, re-read on reload.
    File(PathBuf),
}

impl PolicyOrigin {
    fn read(&self) -> PolicyResult<LoadedPolicy> {
        match self {
            Self::Inline(text) => parse_policy(text.as_bytes()),
            Self::File(path) => {
                let bytes = std::fs::read(path).map_err(|e| PolicyError::io(path, e))?;
                parse_policy(&bytes)
            }
        }
    }
}

// Inline policies carry credentials; only their size is printed.
impl fmt::Debug for PolicyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(text) => write!(f, "Inline({} bytes)", text.len()),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl fmt::Display for PolicyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("inline"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Result of a successful reload.
#[derive(Debug)]
pub struct ReloadOutcome {
    /// Generation of the document now being served.
    pub generation: u64,
    /// Number of host policies in it.
    pub hosts: usize,
    /// Entries dropped while compiling it.
    pub issues: Vec<ValidationIssue>,
}

/// Counters describing a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStats {
    pub generation: u64,
    pub hosts: usize,
    pub reloads: u64,
    pub failed_reloads: u64,
}

/// Holds the document currently in force.
pub struct PolicySource {
    origin: PolicyOrigin,
    current: ArcSwap<PolicyDocument>,
    reloads: AtomicU64,
    failed_reloads: AtomicU64,
}

impl PolicySource {
    /// Load the initial document from `origin`.
    ///
    /// Never fails: an unreadable or malformed first document is logged and
    /// replaced by the deny-all document.
    pub fn new(origin: PolicyOrigin) -> Self {
        let document = match origin.read() {
            Ok(loaded) => {
                info!(
                    origin = %origin,
                    generation = loaded.document.generation(),
                    hosts = loaded.document.hosts().len(),
                    "Policy loaded"
                );
                loaded.document
            }
            Err(e) => {
                error!(
                    origin = %origin,
                    error = %e,
                    "Failed to load policy, denying all requests until a reload succeeds"
                );
                PolicyDocument::deny_all()
            }
        };

        Self::with_document(origin, document)
    }

    /// A source serving a prebuilt document. Reloading it re-parses an empty
    /// inline policy.
    pub fn from_document(document: PolicyDocument) -> Self {
        Self::with_document(PolicyOrigin::Inline(String::new()), document)
    }

    fn with_document(origin: PolicyOrigin, document: PolicyDocument) -> Self {
        Self {
            origin,
            current: ArcSwap::from_pointee(document),
            reloads: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
        }
    }

    /// Where this source reads from.
    pub fn origin(&self) -> &PolicyOrigin {
        &self.origin
    }

    /// The document currently in force.
    pub fn document(&self) -> Arc<PolicyDocument> {
        self.current.load_full()
    }

    /// Re-read the origin and swap in the result.
    ///
    /// # Errors
    ///
    /// Returns the read or parse error; the current document is left in place.
    pub fn reload(&self) -> PolicyResult<ReloadOutcome> {
        match self.origin.read() {
            Ok(LoadedPolicy { document, issues }) => {
                let generation = document.generation();
                let hosts = document.hosts().len();
                let previous = self.current.swap(Arc::new(document));
                self.reloads.fetch_add(1, Ordering::Relaxed);

                info!(
                    origin = %self.origin,
                    previous_generation = previous.generation(),
                    generation,
                    hosts,
                    issues = issues.len(),
                    "Policy reloaded"
                );

                Ok(ReloadOutcome {
                    generation,
                    hosts,
                    issues,
                })
            }
            Err(e) => {
                self.failed_reloads.fetch_add(1, Ordering::Relaxed);
                warn!(
                    origin = %self.origin,
                    error = %e,
                    generation = self.current.load().generation(),
                    "Policy reload failed, keeping current document"
                );
                Err(e)
            }
        }
    }

    /// Swap in a prebuilt document.
    pub fn replace(&self, document: PolicyDocument) {
        let generation = document.generation();
        self.current.store(Arc::new(document));
        info!(generation, "Policy replaced");
    }

    /// Start reloading whenever the policy file changes.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails for inline origins and when the file system watch cannot be
    /// established.
    pub fn watch(self: &Arc<Self>, config: WatcherConfig) -> Result<WatcherHandle, WatcherError> {
        match &self.origin {
            PolicyOrigin::File(path) => watcher::spawn(Arc::clone(self), path.clone(), config),
            PolicyOrigin::Inline(_) => Err(WatcherError::NotWatchable),
        }
    }

    pub fn stats(&self) -> SourceStats {
        let document = self.current.load();
        SourceStats {
            generation: document.generation(),
            hosts: document.hosts().len(),
            reloads: self.reloads.load(Ordering::Relaxed),
            failed_reloads: self.failed_reloads.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for PolicySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicySource")
            .field("origin", &self.origin)
            .field("generation", &self.current.load().generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ONE_HOST: &str = r#"[{"host": "a\\.com", "settings": {
        "bearer_tokens": [{"token": "T", "allowed_paths": ["^/x$"]}],
        "basic_auths": [], "no_auths": {}}}]"#;

    const TWO_HOSTS: &str = r#"[
        {"host": "a\\.com", "settings": {"bearer_tokens": [], "basic_auths": [], "no_auths": {}}},
        {"host": "b\\.com", "settings": {"bearer_tokens": [], "basic_auths": [], "no_auths": {}}}]"#;

    fn policy_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_inline_origin() {
        let source = PolicySource::new(PolicyOrigin::Inline(ONE_HOST.to_string()));
        assert_eq!(source.stats().hosts, 1);
        assert_eq!(source.document().find_host("a.com"), Some(0));
    }

    #[test]
    fn test_first_load_failure_denies_all() {
        let source = PolicySource::new(PolicyOrigin::Inline("{not json".to_string()));
        assert!(source.document().is_empty());

        let source = PolicySource::new(PolicyOrigin::File("/nonexistent/policy.json".into()));
        assert!(source.document().is_empty());
    }

    #[test]
    fn test_reload_picks_up_file_changes() {
        let file = policy_file(ONE_HOST);
        let source = PolicySource::new(PolicyOrigin::File(file.path().to_path_buf()));
        let before = source.stats().generation;

        std::fs::write(file.path(), TWO_HOSTS).unwrap();
        let outcome = source.reload().unwrap();

        assert_eq!(outcome.hosts, 2);
        assert!(outcome.issues.is_empty());
        assert_ne!(outcome.generation, before);
        assert_eq!(source.stats().reloads, 1);
        assert_eq!(source.document().generation(), outcome.generation);
    }

    #[test]
    fn test_failed_reload_keeps_last_good_document() {
        let file = policy_file(ONE_HOST);
        let source = PolicySource::new(PolicyOrigin::File(file.path().to_path_buf()));
        let before = source.document();

        std::fs::write(file.path(), "[{\"host\": 1}]").unwrap();
        let err = source.reload().unwrap_err();
        assert!(err.is_structural());

        assert_eq!(source.document().generation(), before.generation());
        assert_eq!(source.stats().failed_reloads, 1);
    }

    #[test]
    fn test_reload_recovers_from_bad_first_load() {
        let file = policy_file("[");
        let source = PolicySource::new(PolicyOrigin::File(file.path().to_path_buf()));
        assert!(source.document().is_empty());

        std::fs::write(file.path(), ONE_HOST).unwrap();
        source.reload().unwrap();
        assert_eq!(source.stats().hosts, 1);
    }

    #[test]
    fn test_inline_origin_is_not_watchable() {
        let source = Arc::new(PolicySource::new(PolicyOrigin::Inline("[]".into())));
        assert!(matches!(
            source.watch(WatcherConfig::default()),
            Err(WatcherError::NotWatchable)
        ));
    }

    #[test]
    fn test_debug_hides_inline_policy() {
        let origin = PolicyOrigin::Inline(ONE_HOST.to_string());
        let printed = format!("{origin:?}");
        assert!(!printed.contains("\"T\""));
        assert!(printed.starts_with("Inline("));
    }
}
