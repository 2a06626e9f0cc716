//! Compiled, immutable policy snapshots.
//!
//! A [`PolicyDocument`] is built once by the [loader](crate::loader) and never
//! mutated afterwards. Configuration changes produce a new document with a new
//! [generation](PolicyDocument::generation) that replaces the old one wholesale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use regex::Regex;

/// Source of process-unique document generations. Zero is never handed out.
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// Rules
// =============================================================================

/// A bearer token and the paths it may access.
#[derive(Debug, Clone)]
pub struct BearerRule {
    token: String,
    allowed_paths: Vec<Regex>,
}

impl BearerRule {
    /// Create a rule. `allowed_paths` is expected to be non-empty; the loader
    /// drops tokens without usable paths before they get here.
    #[must_use]
    pub fn new(token: impl Into<String>, allowed_paths: Vec<Regex>) -> Self {
        Self {
            token: token.into(),
            allowed_paths,
        }
    }

    /// The token value.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Compiled allowed path patterns.
    #[must_use]
    pub fn allowed_paths(&self) -> &[Regex] {
        &self.allowed_paths
    }

    /// Whether `path` matches any allowed pattern.
    #[must_use]
    pub fn allows(&self, path: &str) -> bool {
        self.allowed_paths.iter().any(|re| re.is_match(path))
    }
}

/// One basic-auth path pattern and the credentials accepted on it.
#[derive(Debug, Clone)]
pub struct BasicAuthRule {
    path: Regex,
    users: HashMap<String, String>,
}

impl BasicAuthRule {
    /// Create a rule with no users.
    #[must_use]
    pub fn new(path: Regex) -> Self {
        Self {
            path,
            users: HashMap::new(),
        }
    }

    /// Add (or overwrite) a username/password pair.
    #[must_use]
    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.insert_user(username, password);
        self
    }

    pub(crate) fn insert_user(&mut self, username: impl Into<String>, password: impl Into<String>) {
        self.users.insert(username.into(), password.into());
    }

    /// The path pattern as written in the configuration.
    #[must_use]
    pub fn pattern(&self) -> &str {
        self.path.as_str()
    }

    /// Whether this rule guards `path`.
    #[must_use]
    pub fn guards(&self, path: &str) -> bool {
        self.path.is_match(path)
    }

    /// Whether `username` is configured on this rule with exactly `password`.
    #[must_use]
    pub fn accepts(&self, username: &str, password: &str) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }

    /// Number of configured users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

// =============================================================================
// Host Policy
// =============================================================================

/// Authorization rules scoped to the request hosts matching one pattern.
#[derive(Debug, Clone)]
pub struct HostPolicy {
    host_pattern: Regex,
    bearer_rules: Vec<BearerRule>,
    basic_auth_rules: Vec<BasicAuthRule>,
    no_auth_paths: Vec<Regex>,
}

impl HostPolicy {
    /// Create a host policy without any rules (every path is bearer-guarded and
    /// no token is known).
    #[must_use]
    pub fn new(host_pattern: Regex) -> Self {
        Self {
            host_pattern,
            bearer_rules: Vec::new(),
            basic_auth_rules: Vec::new(),
            no_auth_paths: Vec::new(),
        }
    }

    /// Add a bearer rule.
    #[must_use]
    pub fn with_bearer_rule(mut self, rule: BearerRule) -> Self {
        self.bearer_rules.push(rule);
        self
    }

    /// Add a basic auth rule.
    #[must_use]
    pub fn with_basic_auth_rule(mut self, rule: BasicAuthRule) -> Self {
        self.basic_auth_rules.push(rule);
        self
    }

    /// Add a path exempt from credentials.
    #[must_use]
    pub fn with_no_auth_path(mut self, path: Regex) -> Self {
        self.no_auth_paths.push(path);
        self
    }

    pub(crate) fn from_parts(
        host_pattern: Regex,
        bearer_rules: Vec<BearerRule>,
        basic_auth_rules: Vec<BasicAuthRule>,
        no_auth_paths: Vec<Regex>,
    ) -> Self {
        Self {
            host_pattern,
            bearer_rules,
            basic_auth_rules,
            no_auth_paths,
        }
    }

    /// The host pattern as written in the configuration.
    #[must_use]
    pub fn host_pattern(&self) -> &str {
        self.host_pattern.as_str()
    }

    /// Whether this policy applies to `domain`.
    #[must_use]
    pub fn matches_host(&self, domain: &str) -> bool {
        self.host_pattern.is_match(domain)
    }

    /// Bearer rules in declaration order.
    #[must_use]
    pub fn bearer_rules(&self) -> &[BearerRule] {
        &self.bearer_rules
    }

    /// Basic auth rules in declaration order of their path keys.
    #[must_use]
    pub fn basic_auth_rules(&self) -> &[BasicAuthRule] {
        &self.basic_auth_rules
    }

    /// Paths exempt from credentials.
    #[must_use]
    pub fn no_auth_paths(&self) -> &[Regex] {
        &self.no_auth_paths
    }

    /// The rule for `token`, if the token is known for this host.
    #[must_use]
    pub fn bearer_rule(&self, token: &str) -> Option<&BearerRule> {
        self.bearer_rules.iter().find(|rule| rule.token == token)
    }

    /// Whether `path` needs no credentials.
    #[must_use]
    pub fn is_no_auth_path(&self, path: &str) -> bool {
        self.no_auth_paths.iter().any(|re| re.is_match(path))
    }

    /// Whether `path` is guarded by at least one basic auth rule.
    #[must_use]
    pub fn is_basic_auth_path(&self, path: &str) -> bool {
        self.basic_auth_rules.iter().any(|rule| rule.guards(path))
    }

    /// Whether the credentials are accepted by some rule guarding `path`.
    #[must_use]
    pub fn verify_basic(&self, path: &str, username: &str, password: &str) -> bool {
        self.basic_auth_rules
            .iter()
            .any(|rule| rule.guards(path) && rule.accepts(username, password))
    }
}

// =============================================================================
// Policy Document
// =============================================================================

/// One compiled configuration snapshot.
#[derive(Debug)]
pub struct PolicyDocument {
    generation: u64,
    hosts: Vec<HostPolicy>,
}

impl PolicyDocument {
    /// Build a document from host policies, assigning a fresh generation.
    #[must_use]
    pub fn new(hosts: Vec<HostPolicy>) -> Self {
        Self {
            generation: next_generation(),
            hosts,
        }
    }

    /// The empty document: every domain is denied.
    #[must_use]
    pub fn deny_all() -> Self {
        Self::new(Vec::new())
    }

    /// Process-unique identity of this snapshot.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Host policies in document order.
    #[must_use]
    pub fn hosts(&self) -> &[HostPolicy] {
        &self.hosts
    }

    /// Index of the first host policy matching `domain`.
    #[must_use]
    pub fn find_host(&self, domain: &str) -> Option<usize> {
        self.hosts.iter().position(|host| host.matches_host(domain))
    }

    /// Host policy by index, as returned by [`find_host`](Self::find_host).
    #[must_use]
    pub fn host(&self, index: usize) -> Option<&HostPolicy> {
        self.hosts.get(index)
    }

    /// Whether the document has no host policies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self::deny_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    #[test]
    fn test_generations_are_unique() {
        let a = PolicyDocument::deny_all();
        let b = PolicyDocument::deny_all();
        assert_ne!(a.generation(), b.generation());
        assert_ne!(a.generation(), 0);
    }

    #[test]
    fn test_find_host_returns_first_match() {
        let doc = PolicyDocument::new(vec![
            HostPolicy::new(re(r"api\..+")),
            HostPolicy::new(re(r".*")),
        ]);

        assert_eq!(doc.find_host("api.example.com"), Some(0));
        assert_eq!(doc.find_host("web.example.com"), Some(1));
        assert!(PolicyDocument::deny_all().find_host("api.example.com").is_none());
    }

    #[test]
    fn test_basic_rule_checks_exact_password() {
        let rule = BasicAuthRule::new(re("^/m/.*$")).with_user("u", "pw");
        assert!(rule.guards("/m/x"));
        assert!(rule.accepts("u", "pw"));
        assert!(!rule.accepts("u", "pw2"));
        assert!(!rule.accepts("v", "pw"));
    }

    #[test]
    fn test_verify_basic_requires_guarding_rule() {
        let host = HostPolicy::new(re(".*"))
            .with_basic_auth_rule(BasicAuthRule::new(re("^/a")).with_user("alice", "secret"))
            .with_basic_auth_rule(BasicAuthRule::new(re("^/b")).with_user("bob", "hunter2"));

        assert!(host.verify_basic("/a/1", "alice", "secret"));
        assert!(!host.verify_basic("/a/1", "bob", "hunter2"));
        assert!(host.verify_basic("/b/1", "bob", "hunter2"));
    }

    #[test]
    fn test_bearer_rule_lookup() {
        let host = HostPolicy::new(re(".*"))
            .with_bearer_rule(BearerRule::new("T1", vec![re("^/a/")]))
            .with_bearer_rule(BearerRule::new("T1", vec![re("^/b/")]));

        let rule = host.bearer_rule("T1").unwrap();
        assert!(rule.allows("/a/1"));
        assert!(!rule.allows("/b/1"));
        assert!(host.bearer_rule("T2").is_none());
    }
}
