//! Match memoization for the decision engine.
//!
//! Regex evaluation dominates the cost of a decision, and the proxy tends to
//! send the same `(host, path, header)` combinations over and over. This module
//! caches the outcome of each evaluation step so repeated requests skip the
//! regex engine entirely.
//!
//! ## Design
//!
//! - **Tables**: one bounded table per evaluation step (host lookup, no-auth
//!   paths, basic-auth paths, basic credentials, bearer paths)
//! - **Keys**: the document generation plus the exact subjects compared, so an
//!   entry computed against one document can never answer for another
//! - **Concurrency**: `moka` tables are internally sharded; unrelated keys do
//!   not contend on a single lock
//! - **Eviction**: least recently used, by entry count
//!
//! Entries are never stale across reloads because the generation is part of
//! every key. The first time a newer generation is observed all tables are
//! flushed as well, so entries for retired documents do not hold capacity.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use tracing::debug;

/// Default capacity of each table.
pub const DEFAULT_CAPACITY: u64 = 1024;

type HostKey = (u64, String);
type PathKey = (u64, String, String);
type SubjectKey = (u64, String, String, String);

struct Tables {
    host: Cache<HostKey, Option<usize>>,
    no_auth: Cache<PathKey, bool>,
    basic_path: Cache<PathKey, bool>,
    basic_credentials: Cache<SubjectKey, bool>,
    bearer_path: Cache<SubjectKey, bool>,
}

fn table<K, V>(capacity: u64) -> Cache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(capacity)
        .eviction_policy(EvictionPolicy::lru())
        .build()
}

impl Tables {
    fn new(capacity: u64) -> Self {
        Self {
            host: table(capacity),
            no_auth: table(capacity),
            basic_path: table(capacity),
            basic_credentials: table(capacity),
            bearer_path: table(capacity),
        }
    }

    fn invalidate_all(&self) {
        self.host.invalidate_all();
        self.no_auth.invalidate_all();
        self.basic_path.invalidate_all();
        self.basic_credentials.invalidate_all();
        self.bearer_path.invalidate_all();
    }
}

/// Bounded, concurrent memoization of regex evaluation outcomes.
pub struct MatchCache {
    tables: Option<Tables>,
    capacity: u64,
    /// Highest document generation seen so far.
    newest_generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MatchCache {
    /// Create a cache holding up to `capacity` entries per table.
    ///
    /// A capacity of zero disables caching.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            tables: (capacity > 0).then(|| Tables::new(capacity)),
            capacity,
            newest_generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that stores nothing; every lookup evaluates.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Whether lookups are memoized.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tables.is_some()
    }

    /// Record that a document generation is being evaluated.
    ///
    /// Flushes all tables the first time a generation newer than any seen
    /// before shows up.
    pub fn observe(&self, generation: u64) {
        let previous = self.newest_generation.fetch_max(generation, Ordering::AcqRel);
        if previous != 0 && generation > previous {
            self.clear();
            debug!(
                previous_generation = previous,
                generation, "Match cache flushed for new policy generation"
            );
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        if let Some(tables) = &self.tables {
            tables.invalidate_all();
        }
    }

    /// Index of the host policy matching `domain`.
    pub fn host(
        &self,
        generation: u64,
        domain: &str,
        compute: impl FnOnce() -> Option<usize>,
    ) -> Option<usize> {
        match &self.tables {
            Some(t) => self.lookup(&t.host, (generation, domain.to_string()), compute),
            None => compute(),
        }
    }

    /// Whether `path` is a no-auth path for the host matching `domain`.
    pub fn no_auth(
        &self,
        generation: u64,
        domain: &str,
        path: &str,
        compute: impl FnOnce() -> bool,
    ) -> bool {
        match &self.tables {
            Some(t) => self.lookup(&t.no_auth, path_key(generation, domain, path), compute),
            None => compute(),
        }
    }

    /// Whether `path` is basic-auth guarded for the host matching `domain`.
    pub fn basic_path(
        &self,
        generation: u64,
        domain: &str,
        path: &str,
        compute: impl FnOnce() -> bool,
    ) -> bool {
        match &self.tables {
            Some(t) => self.lookup(&t.basic_path, path_key(generation, domain, path), compute),
            None => compute(),
        }
    }

    /// Whether the raw `authorization` header grants `path`.
    pub fn basic_credentials(
        &self,
        generation: u64,
        authorization: &str,
        domain: &str,
        path: &str,
        compute: impl FnOnce() -> bool,
    ) -> bool {
        match &self.tables {
            Some(t) => self.lookup(
                &t.basic_credentials,
                subject_key(generation, authorization, domain, path),
                compute,
            ),
            None => compute(),
        }
    }

    /// Whether `token` may access `path` on the host matching `domain`.
    pub fn bearer_path(
        &self,
        generation: u64,
        token: &str,
        domain: &str,
        path: &str,
        compute: impl FnOnce() -> bool,
    ) -> bool {
        match &self.tables {
            Some(t) => self.lookup(
                &t.bearer_path,
                subject_key(generation, token, domain, path),
                compute,
            ),
            None => compute(),
        }
    }

    fn lookup<K, V>(&self, cache: &Cache<K, V>, key: K, compute: impl FnOnce() -> V) -> V
    where
        K: Hash + Eq + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let entry = cache.entry(key).or_insert_with(compute);
        if entry.is_fresh() {
            self.misses.fetch_add(1, Ordering::Relaxed);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        entry.into_value()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> MatchCacheStats {
        let entries = self
            .tables
            .as_ref()
            .map(|t| TableEntries {
                host: settled_count(&t.host),
                no_auth: settled_count(&t.no_auth),
                basic_path: settled_count(&t.basic_path),
                basic_credentials: settled_count(&t.basic_credentials),
                bearer_path: settled_count(&t.bearer_path),
            })
            .unwrap_or_default();

        MatchCacheStats {
            enabled: self.is_enabled(),
            capacity: self.capacity,
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            newest_generation: self.newest_generation.load(Ordering::Relaxed),
        }
    }
}

/// Entry count after applying pending inserts and evictions.
fn settled_count<K, V>(cache: &Cache<K, V>) -> u64
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    cache.run_pending_tasks();
    cache.entry_count()
}

impl Default for MatchCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for MatchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchCache")
            .field("enabled", &self.is_enabled())
            .field("capacity", &self.capacity)
            .finish()
    }
}

fn path_key(generation: u64, domain: &str, path: &str) -> PathKey {
    (generation, domain.to_string(), path.to_string())
}

fn subject_key(generation: u64, subject: &str, domain: &str, path: &str) -> SubjectKey {
    (
        generation,
        subject.to_string(),
        domain.to_string(),
        path.to_string(),
    )
}

/// Entry counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableEntries {
    pub host: u64,
    pub no_auth: u64,
    pub basic_path: u64,
    pub basic_credentials: u64,
    pub bearer_path: u64,
}

impl TableEntries {
    /// Entries across all tables.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.host + self.no_auth + self.basic_path + self.basic_credentials + self.bearer_path
    }
}

/// Statistics about the match cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCacheStats {
    /// Whether caching is enabled.
    pub enabled: bool,

    /// Capacity of each table.
    pub capacity: u64,

    /// Entries currently held, per table.
    pub entries: TableEntries,

    /// Lookups answered from the cache.
    pub hits: u64,

    /// Lookups that had to evaluate.
    pub misses: u64,

    /// Newest document generation observed.
    pub newest_generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_second_lookup_is_a_hit() {
        let cache = MatchCache::new(16);
        let calls = AtomicUsize::new(0);
        let eval = || {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        };

        assert!(cache.no_auth(1, "a.com", "/x", eval));
        assert!(cache.no_auth(1, "a.com", "/x", eval));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries.no_auth, 1);
        assert_eq!(stats.entries.total(), 1);
    }

    #[test]
    fn test_generation_is_part_of_the_key() {
        let cache = MatchCache::new(16);
        assert!(cache.bearer_path(1, "T", "a.com", "/x", || true));
        assert!(!cache.bearer_path(2, "T", "a.com", "/x", || false));
        assert!(cache.bearer_path(1, "T", "a.com", "/x", || false));
    }

    #[test]
    fn test_tables_are_independent() {
        let cache = MatchCache::new(16);
        assert!(cache.no_auth(1, "a.com", "/x", || true));
        assert!(!cache.basic_path(1, "a.com", "/x", || false));
        assert_eq!(cache.host(1, "a.com", || Some(3)), Some(3));
        assert_eq!(cache.host(1, "b.com", || None), None);
    }

    #[test]
    fn test_observe_newer_generation_flushes() {
        let cache = MatchCache::new(16);
        cache.observe(5);
        cache.no_auth(5, "a.com", "/x", || true);
        assert_eq!(cache.stats().entries.total(), 1);

        // Same or older generation keeps entries.
        cache.observe(5);
        cache.observe(4);
        assert_eq!(cache.stats().entries.total(), 1);

        cache.observe(6);
        assert_eq!(cache.stats().entries.total(), 0);
        assert_eq!(cache.stats().newest_generation, 6);
    }

    #[test]
    fn test_disabled_cache_always_evaluates() {
        let cache = MatchCache::disabled();
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            cache.basic_credentials(1, "Basic x", "a.com", "/x", || {
                calls.fetch_add(1, Ordering::SeqCst);
                false
            });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let stats = cache.stats();
        assert!(!stats.enabled);
        assert_eq!(stats.entries.total(), 0);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let cache = MatchCache::new(8);
        for i in 0..100 {
            cache.no_auth(1, "a.com", &format!("/{i}"), || true);
        }
        assert!(cache.stats().entries.no_auth <= 8);
    }

    #[test]
    fn test_concurrent_lookups() {
        let cache = Arc::new(MatchCache::new(128));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..200usize {
                        let n = i % 16;
                        let got = cache.bearer_path(1, "T", &format!("h{t}"), &format!("/{n}"), || {
                            n % 2 == 0
                        });
                        assert_eq!(got, n % 2 == 0);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.stats().hits > 0);
    }
}
