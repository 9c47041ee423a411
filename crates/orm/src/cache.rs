//! Query Result Cache - Per-connection caching of compiled query results
//!
//! Entries are keyed by a signature derived from the compiled statement and
//! carry the set of tables the result depends on. Any write to a dependent
//! table evicts the entry before the write call returns.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::debug;

use crate::connection::Row;

/// Configuration for the query result cache
#[derive(Debug, Clone)]
pub struct QueryCacheConfig {
    /// Whether caching is active
    pub enabled: bool,
    /// Time to live applied when a query declares no explicit TTL
    pub default_ttl: Duration,
    /// Maximum number of cached result sets (oldest evicted first)
    pub max_entries: usize,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_ttl: Duration::from_secs(60),
            max_entries: 1000,
        }
    }
}

/// Hit/miss counters for cache introspection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Total number of lookups
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of lookups served from the cache (0.0 when unused)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A cached result set with its table dependencies
#[derive(Debug, Clone)]
struct CacheEntry {
    rows: Vec<Row>,
    dependencies: BTreeSet<String>,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.created_at.elapsed() > self.ttl
    }
}

/// Per-connection result cache with table-scoped invalidation
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
    config: QueryCacheConfig,
}

impl QueryCache {
    /// Create a cache with the given configuration
    pub fn new(config: QueryCacheConfig) -> Self {
        Self {
            entries: HashMap::new(),
            stats: CacheStats::default(),
            config,
        }
    }

    /// Whether lookups and stores are active
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Enable caching with the given default TTL
    pub fn enable(&mut self, default_ttl: Duration) {
        self.config.enabled = true;
        self.config.default_ttl = default_ttl;
    }

    /// Disable caching without discarding entries or counters
    pub fn disable(&mut self) {
        self.config.enabled = false;
    }

    /// TTL applied when a query declares none
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Compute the signature for a compiled query
    ///
    /// The signature covers the root table, the statement text, the bound
    /// parameter values, and the requested field subset.
    pub fn signature(table: &str, sql: &str, params: &[Value], fields: &str) -> String {
        let rendered = serde_json::to_string(params).unwrap_or_default();
        format!("{}|{}|{}|{}", table, sql, rendered, fields)
    }

    /// Look up a live entry, recording a hit or miss
    pub fn lookup(&mut self, signature: &str) -> Option<Vec<Row>> {
        let expired = self
            .entries
            .get(signature)
            .map(CacheEntry::is_expired)
            .unwrap_or(false);
        if expired {
            self.entries.remove(signature);
        }

        match self.entries.get(signature) {
            Some(entry) => {
                self.stats.hits += 1;
                debug!(signature = signature, "query cache hit");
                Some(entry.rows.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Store a result set under its signature
    pub fn store(
        &mut self,
        signature: String,
        rows: Vec<Row>,
        dependencies: BTreeSet<String>,
        ttl: Option<Duration>,
    ) {
        if self.entries.len() >= self.config.max_entries
            && !self.entries.contains_key(&signature)
        {
            self.evict_oldest();
        }
        self.entries.insert(
            signature,
            CacheEntry {
                rows,
                dependencies,
                created_at: Instant::now(),
                ttl: ttl.unwrap_or(self.config.default_ttl),
            },
        );
    }

    /// Evict every entry depending on the given table
    ///
    /// Returns the number of entries removed. Called synchronously from the
    /// write path before the write returns.
    pub fn invalidate_table(&mut self, table: &str) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.dependencies.contains(table));
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(table = table, evicted = evicted, "query cache invalidated");
        }
        evicted
    }

    /// Discard all entries; hit/miss counters are preserved
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Discard all entries and zero the counters (connection close)
    pub fn reset(&mut self) {
        self.entries.clear();
        self.stats = CacheStats::default();
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current hit/miss counters
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(sig, _)| sig.clone());
        if let Some(sig) = oldest {
            self.entries.remove(&sig);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(tables: &[&str]) -> BTreeSet<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    fn enabled_cache() -> QueryCache {
        QueryCache::new(QueryCacheConfig {
            enabled: true,
            default_ttl: Duration::from_secs(60),
            max_entries: 4,
        })
    }

    #[test]
    fn test_lookup_records_hit_and_miss() {
        let mut cache = enabled_cache();
        let sig = QueryCache::signature("books", "SELECT 1", &[], "*");

        assert!(cache.lookup(&sig).is_none());
        cache.store(sig.clone(), vec![Row::default()], deps(&["books"]), None);
        assert!(cache.lookup(&sig).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total(), 2);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_invalidate_table_evicts_dependents_only() {
        let mut cache = enabled_cache();
        cache.store(
            "a".to_string(),
            Vec::new(),
            deps(&["books", "authors"]),
            None,
        );
        cache.store("b".to_string(), Vec::new(), deps(&["tags"]), None);

        assert_eq!(cache.invalidate_table("authors"), 1);
        assert!(cache.lookup("a").is_none());
        assert!(cache.lookup("b").is_some());
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let mut cache = enabled_cache();
        cache.store(
            "a".to_string(),
            Vec::new(),
            deps(&["books"]),
            Some(Duration::from_secs(0)),
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.lookup("a").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_clear_preserves_counters() {
        let mut cache = enabled_cache();
        cache.store("a".to_string(), Vec::new(), deps(&["books"]), None);
        cache.lookup("a");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);

        cache.reset();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut cache = enabled_cache();
        for i in 0..5 {
            cache.store(format!("sig{}", i), Vec::new(), deps(&["t"]), None);
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(cache.len(), 4);
        assert!(cache.lookup("sig0").is_none());
    }

    #[test]
    fn test_signature_varies_with_params_and_fields() {
        let a = QueryCache::signature("t", "SELECT", &[Value::from(1)], "*");
        let b = QueryCache::signature("t", "SELECT", &[Value::from(2)], "*");
        let c = QueryCache::signature("t", "SELECT", &[Value::from(1)], "id,name");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
