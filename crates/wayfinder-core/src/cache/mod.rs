//! Namespace-partitioned LRU cache with per-entry TTL.
//!
//! Each namespace has its own capacity, default TTL and statistics, and is
//! guarded by its own mutex. Locks are never held across an `.await`, so
//! every structural mutation completes as one non-suspending critical
//! section even when the engine is shared by many tasks.
//!
//! Recency semantics:
//! - `get` promotes the entry to most-recently-used.
//! - `has` and `peek` never change recency; `has` still drops an expired
//!   entry it runs into.

mod lru;

pub use lru::CacheEntry;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;

use lru::LruList;

/// Errors from cache configuration and writes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Unknown cache namespace: {0}")]
    UnknownNamespace(String),

    #[error("Cache namespace '{0}' must have a capacity of at least 1")]
    ZeroCapacity(String),

    #[error("Cache namespace '{0}' declared twice")]
    DuplicateNamespace(String),
}

/// Configuration of one cache partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub name: String,
    pub capacity: usize,
    #[serde(with = "crate::duration")]
    pub default_ttl: Duration,
}

impl NamespaceConfig {
    pub fn new(name: impl Into<String>, capacity: usize, default_ttl: Duration) -> Self {
        Self {
            name: name.into(),
            capacity,
            default_ttl,
        }
    }
}

/// Point-in-time statistics for one namespace, or summed across all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    fn with_hit_rate(mut self) -> Self {
        let lookups = self.hits + self.misses;
        self.hit_rate = if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        };
        self
    }
}

#[derive(Debug)]
struct Partition<V> {
    list: LruList<V>,
    capacity: usize,
    default_ttl: Duration,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> Partition<V> {
    fn new(config: &NamespaceConfig) -> Self {
        Self {
            list: LruList::with_capacity(config.capacity),
            capacity: config.capacity,
            default_ttl: config.default_ttl,
            hits: 0,
            misses: 0,
            evictions: 0,
            expirations: 0,
        }
    }

    /// Drop `key` if it is expired at `now`; true when it was dropped.
    fn expire_if_stale(&mut self, key: &str, now: Instant) -> bool {
        let stale = self
            .list
            .peek(key)
            .map(|e| e.is_expired_at(now))
            .unwrap_or(false);
        if stale {
            self.list.remove(key);
            self.expirations += 1;
        }
        stale
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.list.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            hit_rate: 0.0,
            evictions: self.evictions,
            expirations: self.expirations,
        }
        .with_hit_rate()
    }
}

/// Bounded, TTL-aware LRU cache partitioned by namespace.
///
/// Construct it once at the composition root and share it behind an `Arc`.
#[derive(Debug)]
pub struct CacheEngine<V> {
    partitions: BTreeMap<String, Mutex<Partition<V>>>,
}

impl<V: Clone> CacheEngine<V> {
    /// Create an engine with the given namespaces.
    pub fn new<I>(namespaces: I) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = NamespaceConfig>,
    {
        let mut partitions = BTreeMap::new();
        for config in namespaces {
            if config.capacity == 0 {
                return Err(CacheError::ZeroCapacity(config.name));
            }
            if partitions.contains_key(&config.name) {
                return Err(CacheError::DuplicateNamespace(config.name));
            }
            partitions.insert(config.name.clone(), Mutex::new(Partition::new(&config)));
        }
        Ok(Self { partitions })
    }

    /// Names of all configured namespaces.
    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.partitions.keys().map(String::as_str)
    }

    pub fn has_namespace(&self, namespace: &str) -> bool {
        self.partitions.contains_key(namespace)
    }

    fn partition(&self, namespace: &str) -> Result<&Mutex<Partition<V>>, CacheError> {
        self.partitions
            .get(namespace)
            .ok_or_else(|| CacheError::UnknownNamespace(namespace.to_string()))
    }

    /// Fetch a live entry and promote it. Expired entries are removed and
    /// reported as absent; unknown namespaces are a miss.
    pub fn get(&self, namespace: &str, key: &str) -> Option<V> {
        let Some(partition) = self.partitions.get(namespace) else {
            tracing::debug!(namespace, "get on unknown cache namespace");
            return None;
        };
        let mut p = partition.lock();

        if p.expire_if_stale(key, Instant::now()) {
            p.misses += 1;
            tracing::trace!(namespace, key, "cache entry expired");
            return None;
        }

        match p.list.touch(key).map(|e| e.value.clone()) {
            Some(value) => {
                p.hits += 1;
                Some(value)
            }
            None => {
                p.misses += 1;
                None
            }
        }
    }

    /// Fetch a live entry without promoting it or counting a lookup.
    pub fn peek(&self, namespace: &str, key: &str) -> Option<V> {
        let partition = self.partitions.get(namespace)?;
        let p = partition.lock();
        p.list
            .peek(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.value.clone())
    }

    /// Whether a live entry exists. Does not change recency.
    pub fn has(&self, namespace: &str, key: &str) -> bool {
        let Some(partition) = self.partitions.get(namespace) else {
            return false;
        };
        let mut p = partition.lock();
        if p.expire_if_stale(key, Instant::now()) {
            return false;
        }
        p.list.contains(key)
    }

    /// Insert or replace an entry, promoting it. `ttl = None` uses the
    /// namespace default. Evicts from the tail while over capacity.
    pub fn set(
        &self,
        namespace: &str,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let partition = self.partition(namespace)?;
        let mut p = partition.lock();

        let ttl = ttl.unwrap_or(p.default_ttl);
        p.list.put(key.into(), CacheEntry::new(value, ttl));

        while p.list.len() > p.capacity {
            match p.list.pop_back() {
                Some((evicted, _)) => {
                    p.evictions += 1;
                    tracing::debug!(namespace, key = %evicted, "evicted least-recently-used entry");
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Remove one entry; true when something was removed.
    pub fn remove(&self, namespace: &str, key: &str) -> bool {
        self.partitions
            .get(namespace)
            .map(|p| p.lock().list.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Remove `key`, or the whole namespace when `key` is `None`.
    /// Returns the number of entries removed.
    pub fn clear(&self, namespace: &str, key: Option<&str>) -> Result<usize, CacheError> {
        let partition = self.partition(namespace)?;
        let mut p = partition.lock();
        Ok(match key {
            Some(key) => usize::from(p.list.remove(key).is_some()),
            None => p.list.clear(),
        })
    }

    /// Empty every namespace; statistics are kept.
    pub fn clear_all(&self) -> usize {
        self.partitions
            .values()
            .map(|p| p.lock().list.clear())
            .sum()
    }

    /// Remove up to `limit` expired entries from one namespace.
    ///
    /// Holds the namespace lock only for this batch so a background sweep
    /// interleaves with foreground traffic.
    pub fn cleanup_expired_batch(&self, namespace: &str, limit: usize) -> usize {
        let Some(partition) = self.partitions.get(namespace) else {
            return 0;
        };
        let mut p = partition.lock();
        let stale = p.list.expired_keys(Instant::now(), limit);
        for key in &stale {
            p.list.remove(key);
        }
        p.expirations += stale.len() as u64;
        stale.len()
    }

    /// Remove every expired entry across all namespaces.
    pub fn cleanup_expired(&self) -> usize {
        let removed: usize = self
            .namespaces()
            .map(|ns| self.cleanup_expired_batch(ns, usize::MAX))
            .sum();
        if removed > 0 {
            tracing::debug!(removed, "removed expired cache entries");
        }
        removed
    }

    /// Number of stored entries (expired ones not yet swept included).
    pub fn len(&self, namespace: &str) -> usize {
        self.partitions
            .get(namespace)
            .map(|p| p.lock().list.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }

    /// Keys from most- to least-recently used.
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        self.partitions
            .get(namespace)
            .map(|p| p.lock().list.keys())
            .unwrap_or_default()
    }

    pub fn stats(&self, namespace: &str) -> Option<CacheStats> {
        self.partitions.get(namespace).map(|p| p.lock().stats())
    }

    /// Statistics summed across namespaces.
    pub fn total_stats(&self) -> CacheStats {
        self.partitions
            .values()
            .map(|p| p.lock().stats())
            .fold(CacheStats::default(), |acc, s| CacheStats {
                size: acc.size + s.size,
                capacity: acc.capacity + s.capacity,
                hits: acc.hits + s.hits,
                misses: acc.misses + s.misses,
                hit_rate: 0.0,
                evictions: acc.evictions + s.evictions,
                expirations: acc.expirations + s.expirations,
            })
            .with_hit_rate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::thread;

    const NS: &str = "destination-intelligence";

    fn engine(capacity: usize) -> CacheEngine<String> {
        CacheEngine::new([NamespaceConfig::new(NS, capacity, Duration::from_secs(60))]).unwrap()
    }

    #[test]
    fn test_capacity_scenario_evicts_first_inserted() {
        let cache = engine(3);
        for k in ["a", "b", "c", "d"] {
            cache.set(NS, k, k.to_uppercase(), None).unwrap();
        }

        assert!(!cache.has(NS, "a"));
        assert!(cache.has(NS, "d"));
        assert_eq!(cache.len(NS), 3);
        assert_eq!(cache.stats(NS).unwrap().evictions, 1);
    }

    #[test]
    fn test_get_promotes_and_protects_from_eviction() {
        let cache = engine(3);
        for k in ["a", "b", "c"] {
            cache.set(NS, k, k.to_string(), None).unwrap();
        }

        assert_eq!(cache.get(NS, "a").as_deref(), Some("a"));
        cache.set(NS, "d", "d".into(), None).unwrap();

        assert!(cache.has(NS, "a"));
        assert!(!cache.has(NS, "b"));
        assert_eq!(cache.keys(NS), vec!["d", "a", "c"]);
    }

    #[test]
    fn test_has_does_not_promote() {
        let cache = engine(2);
        cache.set(NS, "a", "1".into(), None).unwrap();
        cache.set(NS, "b", "2".into(), None).unwrap();

        assert!(cache.has(NS, "a"));
        cache.set(NS, "c", "3".into(), None).unwrap();

        assert!(!cache.has(NS, "a"), "has() must not refresh recency");
        assert!(cache.has(NS, "b"));
    }

    #[test]
    fn test_update_in_place_promotes() {
        let cache = engine(2);
        cache.set(NS, "a", "1".into(), None).unwrap();
        cache.set(NS, "b", "2".into(), None).unwrap();
        cache.set(NS, "a", "one".into(), None).unwrap();
        cache.set(NS, "c", "3".into(), None).unwrap();

        assert_eq!(cache.get(NS, "a").as_deref(), Some("one"));
        assert!(!cache.has(NS, "b"));
    }

    #[test]
    fn test_ttl_expiry_scenario() {
        let cache = engine(10);
        cache
            .set(NS, "k", "v".into(), Some(Duration::from_millis(100)))
            .unwrap();
        assert!(cache.has(NS, "k"));

        thread::sleep(Duration::from_millis(150));

        assert_eq!(cache.get(NS, "k"), None);
        assert!(!cache.has(NS, "k"));
        let stats = cache.stats(NS).unwrap();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_cleanup_expired_sweeps_only_stale() {
        let cache = engine(10);
        cache
            .set(NS, "short", "s".into(), Some(Duration::from_millis(20)))
            .unwrap();
        cache.set(NS, "long", "l".into(), None).unwrap();

        thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(NS), 1);
        assert!(cache.has(NS, "long"));
    }

    #[test]
    fn test_cleanup_batch_respects_limit() {
        let cache = engine(10);
        for i in 0..5 {
            cache
                .set(NS, format!("k{}", i), "v".into(), Some(Duration::from_millis(10)))
                .unwrap();
        }
        thread::sleep(Duration::from_millis(30));

        assert_eq!(cache.cleanup_expired_batch(NS, 2), 2);
        assert_eq!(cache.cleanup_expired_batch(NS, 2), 2);
        assert_eq!(cache.cleanup_expired_batch(NS, 2), 1);
        assert!(cache.is_empty(NS));
    }

    #[test]
    fn test_stats_hit_rate() {
        let cache = engine(4);
        cache.set(NS, "a", "1".into(), None).unwrap();

        cache.get(NS, "a");
        cache.get(NS, "a");
        cache.get(NS, "a");
        cache.get(NS, "missing");

        let stats = cache.stats(NS).unwrap();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(cache.total_stats().hits, 3);
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let cache: CacheEngine<u32> = CacheEngine::new([
            NamespaceConfig::new("currency", 1, Duration::from_secs(60)),
            NamespaceConfig::new("weather", 1, Duration::from_secs(60)),
        ])
        .unwrap();

        cache.set("currency", "k", 1, None).unwrap();
        cache.set("weather", "k", 2, None).unwrap();

        assert_eq!(cache.get("currency", "k"), Some(1));
        assert_eq!(cache.get("weather", "k"), Some(2));
        assert_eq!(cache.clear("currency", None).unwrap(), 1);
        assert_eq!(cache.get("weather", "k"), Some(2));
    }

    #[test]
    fn test_unknown_namespace() {
        let cache = engine(1);
        assert_eq!(cache.get("nope", "k"), None);
        assert!(!cache.has("nope", "k"));
        assert_eq!(
            cache.set("nope", "k", "v".into(), None),
            Err(CacheError::UnknownNamespace("nope".into()))
        );
    }

    #[test]
    fn test_invalid_configuration() {
        let zero = CacheEngine::<u8>::new([NamespaceConfig::new("x", 0, Duration::from_secs(1))]);
        assert!(matches!(zero, Err(CacheError::ZeroCapacity(_))));

        let dup = CacheEngine::<u8>::new([
            NamespaceConfig::new("x", 1, Duration::from_secs(1)),
            NamespaceConfig::new("x", 2, Duration::from_secs(1)),
        ]);
        assert!(matches!(dup, Err(CacheError::DuplicateNamespace(_))));
    }

    #[test]
    fn test_clear_single_key_and_all() {
        let cache = engine(5);
        cache.set(NS, "a", "1".into(), None).unwrap();
        cache.set(NS, "b", "2".into(), None).unwrap();

        assert_eq!(cache.clear(NS, Some("a")).unwrap(), 1);
        assert_eq!(cache.clear(NS, Some("a")).unwrap(), 0);
        assert_eq!(cache.clear_all(), 1);
        assert!(cache.is_empty(NS));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(u8),
        Get(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![(0u8..8).prop_map(Op::Set), (0u8..8).prop_map(Op::Get)]
    }

    proptest! {
        /// Compare against a plain Vec kept in recency order.
        #[test]
        fn prop_matches_reference_lru(
            capacity in 1usize..5,
            ops in prop::collection::vec(op(), 1..60),
        ) {
            let cache = engine(capacity);
            let mut model: Vec<String> = Vec::new();

            for op in ops {
                match op {
                    Op::Set(k) => {
                        let key = k.to_string();
                        model.retain(|m| m != &key);
                        model.insert(0, key.clone());
                        let expected_evicted =
                            if model.len() > capacity { model.pop() } else { None };

                        cache.set(NS, key, "v".into(), None).unwrap();

                        if let Some(evicted) = expected_evicted {
                            prop_assert!(!cache.has(NS, &evicted));
                        }
                    }
                    Op::Get(k) => {
                        let key = k.to_string();
                        let present = model.contains(&key);
                        if present {
                            model.retain(|m| m != &key);
                            model.insert(0, key.clone());
                        }
                        prop_assert_eq!(cache.get(NS, &key).is_some(), present);
                    }
                }

                prop_assert!(cache.len(NS) <= capacity);
                prop_assert_eq!(cache.keys(NS), model.clone());
            }
        }
    }
}
