//! Host and path based authorization decisions.
//!
//! A policy is a JSON list of host entries, each declaring which paths need no
//! credentials, which are guarded by HTTP Basic users and which bearer tokens
//! may reach which paths. This crate compiles that document once, serves it
//! through a hot-swappable [`PolicySource`] and answers per-request questions
//! with a [`DecisionEngine`] backed by a [`MatchCache`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ambassador_policy::{
//!     AccessRequest, DecisionEngine, Gatekeeper, MatchCache, PolicyOrigin, PolicySource, Verdict,
//! };
//!
//! let policy = r#"[{"host": "^api\\..+$", "settings": {
//!     "bearer_tokens": [{"token": "T1", "allowed_paths": ["^/a/.*$"]}],
//!     "basic_auths": [],
//!     "no_auths": {"allowed_paths": ["^/health$"]}}}]"#;
//!
//! let source = Arc::new(PolicySource::new(PolicyOrigin::Inline(policy.to_string())));
//! let gatekeeper = Gatekeeper::new(source, DecisionEngine::new(Arc::new(MatchCache::default())));
//!
//! let verdict = gatekeeper.check(&AccessRequest::new("api.example.com", "/a/1", "Bearer T1"));
//! assert_eq!(verdict, Verdict::BearerPathGranted);
//! ```

pub mod cache;
pub mod credentials;
pub mod document;
pub mod engine;
pub mod error;
pub mod loader;
pub mod source;
pub mod verdict;
pub mod watcher;

pub use cache::{MatchCache, MatchCacheStats};
pub use document::{BasicAuthRule, BearerRule, HostPolicy, PolicyDocument};
pub use engine::{AccessRequest, DecisionEngine, Gatekeeper};
pub use error::{IssueKind, PolicyError, PolicyResult, ValidationIssue};
pub use loader::{LoadedPolicy, parse_policy};
pub use source::{PolicyOrigin, PolicySource, ReloadOutcome, SourceStats};
pub use verdict::Verdict;
pub use watcher::{WatcherConfig, WatcherError, WatcherHandle};
