//! The authorization decision.
//!
//! [`DecisionEngine::decide`] walks one request through a policy document in a
//! fixed order, short-circuiting on the first step that settles it:
//!
//! 1. host lookup (first matching host policy, otherwise denied),
//! 2. no-auth paths,
//! 3. basic-auth guarded paths (these win over any bearer token),
//! 4. bearer tokens and their allowed paths.
//!
//! Every regex evaluation is routed through the shared [`MatchCache`].

use std::sync::Arc;

use tracing::debug;

use crate::cache::MatchCache;
use crate::credentials::{parse_basic, parse_bearer};
use crate::document::{HostPolicy, PolicyDocument};
use crate::source::PolicySource;
use crate::verdict::Verdict;

/// The request attributes a decision depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRequest<'a> {
    /// Request host, including the port when the client sent one.
    pub domain: &'a str,
    /// Request path.
    pub path: &'a str,
    /// Raw `Authorization` header value, empty when absent.
    pub authorization: &'a str,
}

impl<'a> AccessRequest<'a> {
    #[must_use]
    pub fn new(domain: &'a str, path: &'a str, authorization: &'a str) -> Self {
        Self {
            domain,
            path,
            authorization,
        }
    }
}

/// Evaluates requests against policy documents.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    cache: Arc<MatchCache>,
}

impl DecisionEngine {
    /// Create an engine memoizing through `cache`.
    #[must_use]
    pub fn new(cache: Arc<MatchCache>) -> Self {
        Self { cache }
    }

    /// The match cache used by this engine.
    #[must_use]
    pub fn cache(&self) -> &Arc<MatchCache> {
        &self.cache
    }

    /// Decide whether `request` may proceed under `document`.
    ///
    /// Never fails: malformed or missing credentials map to a denying verdict.
    pub fn decide(&self, document: &PolicyDocument, request: &AccessRequest<'_>) -> Verdict {
        let verdict = self.evaluate(document, request);
        debug!(
            domain = request.domain,
            path = request.path,
            generation = document.generation(),
            verdict = verdict.as_str(),
            "Access decision"
        );
        verdict
    }

    fn evaluate(&self, document: &PolicyDocument, request: &AccessRequest<'_>) -> Verdict {
        let generation = document.generation();
        self.cache.observe(generation);

        let AccessRequest { domain, path, .. } = *request;

        let host = self
            .cache
            .host(generation, domain, || document.find_host(domain))
            .and_then(|index| document.host(index));
        let Some(host) = host else {
            return Verdict::DomainDenied;
        };

        if self
            .cache
            .no_auth(generation, domain, path, || host.is_no_auth_path(path))
        {
            return Verdict::NoAuthGranted;
        }

        if self
            .cache
            .basic_path(generation, domain, path, || host.is_basic_auth_path(path))
        {
            return self.decide_basic(generation, host, request);
        }

        self.decide_bearer(generation, host, request)
    }

    fn decide_basic(
        &self,
        generation: u64,
        host: &HostPolicy,
        request: &AccessRequest<'_>,
    ) -> Verdict {
        let AccessRequest {
            domain,
            path,
            authorization,
        } = *request;

        let granted = self
            .cache
            .basic_credentials(generation, authorization, domain, path, || {
                parse_basic(authorization).is_some_and(|credentials| {
                    host.verify_basic(path, &credentials.username, &credentials.password)
                })
            });

        if granted {
            Verdict::BasicAuthGranted
        } else {
            Verdict::BasicAuthRequired
        }
    }

    fn decide_bearer(
        &self,
        generation: u64,
        host: &HostPolicy,
        request: &AccessRequest<'_>,
    ) -> Verdict {
        let authorization = request.authorization;
        if authorization.is_empty() {
            return Verdict::BearerHeaderMissing;
        }

        let Some(rule) = parse_bearer(authorization).and_then(|token| host.bearer_rule(token))
        else {
            return Verdict::BearerTokenUnknown;
        };

        let allowed = self.cache.bearer_path(
            generation,
            rule.token(),
            request.domain,
            request.path,
            || rule.allows(request.path),
        );

        if allowed {
            Verdict::BearerPathGranted
        } else {
            Verdict::BearerPathDenied
        }
    }
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::new(Arc::new(MatchCache::default()))
    }
}

/// A policy source paired with an engine: the per-request entry point.
#[derive(Debug, Clone)]
pub struct Gatekeeper {
    source: Arc<PolicySource>,
    engine: DecisionEngine,
}

impl Gatekeeper {
    #[must_use]
    pub fn new(source: Arc<PolicySource>, engine: DecisionEngine) -> Self {
        Self { source, engine }
    }

    /// Decide `request` against the current document.
    ///
    /// The document is loaded once, so a reload racing with this call is
    /// either fully seen or not seen at all.
    pub fn check(&self, request: &AccessRequest<'_>) -> Verdict {
        let document = self.source.document();
        self.engine.decide(&document, request)
    }

    #[must_use]
    pub fn source(&self) -> &Arc<PolicySource> {
        &self.source
    }

    #[must_use]
    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }
}
