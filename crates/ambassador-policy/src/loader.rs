//! Policy document loader.
//!
//! Turns a raw JSON configuration blob into a compiled [`PolicyDocument`].
//!
//! # Format
//!
//! ```json
//! [
//!   {
//!     "host": "api\\..+",
//!     "settings": {
//!       "bearer_tokens": [{"token": "T1", "allowed_paths": ["^/a/.*$"]}],
//!       "basic_auths": [{"username": "u", "password": "pw", "allowed_paths": ["^/m/.*$"]}],
//!       "no_auths": {"allowed_paths": ["^/static/"]}
//!     }
//!   }
//! ]
//! ```
//!
//! Failures are two-tiered. A structural problem (wrong top-level shape, a
//! missing required field, a wrong type) rejects the whole document. A pattern
//! that fails to compile only drops that pattern, recorded as a
//! [`ValidationIssue`]; a bearer token left without any pattern is dropped
//! entirely and behaves exactly like an unconfigured token.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use crate::document::{BasicAuthRule, BearerRule, HostPolicy, PolicyDocument};
use crate::error::{IssueKind, PolicyResult, ValidationIssue};

// =============================================================================
// Wire Format
// =============================================================================

#[derive(Debug, Deserialize)]
struct HostEntry {
    host: String,
    settings: HostSettings,
}

#[derive(Debug, Deserialize)]
struct HostSettings {
    bearer_tokens: Vec<BearerTokenEntry>,
    basic_auths: Vec<BasicAuthEntry>,
    no_auths: NoAuthEntry,
}

#[derive(Debug, Deserialize)]
struct BearerTokenEntry {
    token: String,
    allowed_paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BasicAuthEntry {
    username: String,
    password: String,
    allowed_paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NoAuthEntry {
    #[serde(default)]
    allowed_paths: Option<Vec<String>>,
}

// =============================================================================
// Loaded Policy
// =============================================================================

/// A compiled document together with what was dropped while compiling it.
#[derive(Debug)]
pub struct LoadedPolicy {
    /// The compiled snapshot.
    pub document: PolicyDocument,
    /// Patterns and rules that were dropped.
    pub issues: Vec<ValidationIssue>,
}

/// Parse and compile a policy document.
///
/// Blank input is treated as the empty policy `[]`.
///
/// # Errors
///
/// Returns [`PolicyError::Structure`](crate::PolicyError::Structure) when the
/// document is not a JSON array of well-formed host entries.
pub fn parse_policy(bytes: &[u8]) -> PolicyResult<LoadedPolicy> {
    let entries: Vec<HostEntry> = if bytes.iter().all(u8::is_ascii_whitespace) {
        Vec::new()
    } else {
        serde_json::from_slice(bytes)?
    };

    let mut issues = Vec::new();
    let hosts: Vec<HostPolicy> = entries
        .into_iter()
        .filter_map(|entry| compile_host(entry, &mut issues))
        .collect();

    let document = PolicyDocument::new(hosts);

    for issue in &issues {
        warn!(
            host = %issue.host,
            kind = %issue.kind,
            subject = %issue.subject,
            error = %issue.message,
            "Dropped policy entry"
        );
    }

    info!(
        generation = document.generation(),
        hosts = document.hosts().len(),
        bearer_tokens = document.hosts().iter().map(|h| h.bearer_rules().len()).sum::<usize>(),
        basic_paths = document.hosts().iter().map(|h| h.basic_auth_rules().len()).sum::<usize>(),
        no_auth_paths = document.hosts().iter().map(|h| h.no_auth_paths().len()).sum::<usize>(),
        issues = issues.len(),
        "Policy document compiled"
    );

    Ok(LoadedPolicy { document, issues })
}

fn compile_host(entry: HostEntry, issues: &mut Vec<ValidationIssue>) -> Option<HostPolicy> {
    let HostEntry { host, settings } = entry;

    let host_pattern = match Regex::new(&host) {
        Ok(re) => re,
        Err(e) => {
            issues.push(ValidationIssue::new(&host, IssueKind::HostPattern, &host, e.to_string()));
            return None;
        }
    };

    let bearer_rules = compile_bearer_rules(&host, settings.bearer_tokens, issues);
    let basic_auth_rules = compile_basic_rules(&host, settings.basic_auths, issues);

    let no_auth_paths = settings
        .no_auths
        .allowed_paths
        .unwrap_or_default()
        .into_iter()
        .filter_map(|raw| match Regex::new(&raw) {
            Ok(re) => Some(re),
            Err(e) => {
                issues.push(ValidationIssue::new(&host, IssueKind::NoAuthPath, raw, e.to_string()));
                None
            }
        })
        .collect();

    Some(HostPolicy::from_parts(
        host_pattern,
        bearer_rules,
        basic_auth_rules,
        no_auth_paths,
    ))
}

fn compile_bearer_rules(
    host: &str,
    entries: Vec<BearerTokenEntry>,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<BearerRule> {
    let mut rules: Vec<BearerRule> = Vec::with_capacity(entries.len());

    for (index, entry) in entries.into_iter().enumerate() {
        // Tokens are secrets; issues refer to them by position only.
        let label = format!("bearer_tokens[{index}]");

        let allowed_paths: Vec<Regex> = entry
            .allowed_paths
            .into_iter()
            .filter_map(|raw| match Regex::new(&raw) {
                Ok(re) => Some(re),
                Err(e) => {
                    issues.push(ValidationIssue::new(host, IssueKind::BearerPath, raw, e.to_string()));
                    None
                }
            })
            .collect();

        if allowed_paths.is_empty() {
            issues.push(ValidationIssue::new(
                host,
                IssueKind::TokenDropped,
                label,
                "no usable allowed_paths; token treated as unconfigured",
            ));
            continue;
        }

        let rule = BearerRule::new(entry.token, allowed_paths);
        match rules.iter().position(|existing| existing.token() == rule.token()) {
            Some(existing) => {
                issues.push(ValidationIssue::new(
                    host,
                    IssueKind::DuplicateToken,
                    label,
                    "token already declared for this host; last declaration wins",
                ));
                rules[existing] = rule;
            }
            None => rules.push(rule),
        }
    }

    rules
}

/// Fold `(path, username, password)` triples into one rule per path key.
fn compile_basic_rules(
    host: &str,
    entries: Vec<BasicAuthEntry>,
    issues: &mut Vec<ValidationIssue>,
) -> Vec<BasicAuthRule> {
    let mut rules: Vec<BasicAuthRule> = Vec::new();
    let mut by_pattern: HashMap<String, usize> = HashMap::new();
    let mut rejected: HashSet<String> = HashSet::new();

    for entry in entries {
        for raw in entry.allowed_paths {
            if rejected.contains(&raw) {
                continue;
            }

            let index = match by_pattern.get(&raw) {
                Some(&index) => index,
                None => match Regex::new(&raw) {
                    Ok(re) => {
                        rules.push(BasicAuthRule::new(re));
                        by_pattern.insert(raw, rules.len() - 1);
                        rules.len() - 1
                    }
                    Err(e) => {
                        issues.push(ValidationIssue::new(
                            host,
                            IssueKind::BasicPath,
                            raw.clone(),
                            e.to_string(),
                        ));
                        rejected.insert(raw);
                        continue;
                    }
                },
            };

            rules[index].insert_user(entry.username.clone(), entry.password.clone());
        }
    }

    rules
}
