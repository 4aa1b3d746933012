//! Embedding cache: pluggable, capacity-bounded, optionally expiring.
//!
//! Keys hash the normalised text together with the model name, so a vector
//! is never served for a different model. Two eviction policies ship:
//! [`FifoCache`] (oldest inserted goes first) and [`LruCache`] (least
//! recently read goes first). Both are safe to share across tasks.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use atelier_core::config::CacheConfig;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 over (model, normalised text), hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(normalized_text: &str, model: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update([0u8]);
        hasher.update(normalized_text.as_bytes());
        let digest = hasher.finalize();
        Self(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub vector: Vec<f32>,
    pub tokens: usize,
    pub cost: f64,
    pub hit_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    pub fn new(vector: Vec<f32>, tokens: usize, cost: f64, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        Self {
            vector,
            tokens,
            cost,
            hit_count: 0,
            created_at: now,
            last_accessed: now,
            expires_at: ttl.map(|t| now + t),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 { 0.0 } else { self.hits as f64 / total as f64 }
    }
}

/// Cache abstraction consumed by the embedding generator.
pub trait EmbeddingCache: Send + Sync {
    /// Returns a copy of the entry with its hit count already bumped.
    fn get(&self, key: &CacheKey) -> Option<CacheEntry>;
    /// Insert or replace, then evict down to capacity.
    fn put(&self, key: CacheKey, entry: CacheEntry);
    /// Drop expired entries; returns how many were removed.
    fn evict_expired(&self) -> usize;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn clear(&self);
    fn stats(&self) -> CacheStats;
}

// ─── Shared ordered storage ──────────────────────────────────────────────────

/// Map plus an order index keyed by a monotonically increasing tick.
/// The smallest tick is the next eviction victim.
#[derive(Debug, Default)]
struct Ordered {
    entries: HashMap<CacheKey, (CacheEntry, u64)>,
    order: BTreeMap<u64, CacheKey>,
    tick: u64,
    stats: CacheStats,
}

impl Ordered {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some((_, tick)) = self.entries.remove(key) {
            self.order.remove(&tick);
        }
    }

    fn get(&mut self, key: &CacheKey, promote: bool) -> Option<CacheEntry> {
        let now = Utc::now();
        let expired = match self.entries.get(key) {
            None => {
                self.stats.misses += 1;
                return None;
            }
            Some((entry, _)) => entry.is_expired_at(now),
        };
        if expired {
            self.remove(key);
            self.stats.misses += 1;
            self.stats.evictions += 1;
            return None;
        }

        let new_tick = if promote { Some(self.next_tick()) } else { None };
        let (entry, tick) = self.entries.get_mut(key)?;
        entry.hit_count += 1;
        entry.last_accessed = now;
        if let Some(new_tick) = new_tick {
            self.order.remove(tick);
            *tick = new_tick;
            self.order.insert(new_tick, key.clone());
        }
        self.stats.hits += 1;
        Some(entry.clone())
    }

    /// `keep_position` leaves an existing key where it is in the order.
    fn put(&mut self, key: CacheKey, entry: CacheEntry, capacity: usize, keep_position: bool) {
        if capacity == 0 {
            return;
        }
        let existing = self.entries.get(&key).map(|(_, t)| *t);
        let tick = match existing {
            Some(t) if keep_position => t,
            Some(t) => {
                self.order.remove(&t);
                let t = self.next_tick();
                self.order.insert(t, key.clone());
                t
            }
            None => {
                let t = self.next_tick();
                self.order.insert(t, key.clone());
                t
            }
        };
        self.entries.insert(key, (entry, tick));

        while self.entries.len() > capacity {
            let Some((_, victim)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&victim);
            self.stats.evictions += 1;
        }
    }

    fn evict_expired(&mut self) -> usize {
        let now = Utc::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, (e, _))| e.is_expired_at(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.evictions += expired.len() as u64;
        expired.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn stats(&self, capacity: usize) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity,
            ..self.stats.clone()
        }
    }
}

// ─── FIFO ────────────────────────────────────────────────────────────────────

/// Oldest-inserted-first eviction. Reads do not change eviction order.
#[derive(Debug)]
pub struct FifoCache {
    capacity: usize,
    inner: Mutex<Ordered>,
}

impl FifoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Ordered::default()),
        }
    }
}

impl EmbeddingCache for FifoCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.lock().ok()?.get(key, false)
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.put(key, entry, self.capacity, true);
        }
    }

    fn evict_expired(&self) -> usize {
        self.inner.lock().map(|mut i| i.evict_expired()).unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.clear();
        }
    }

    fn stats(&self) -> CacheStats {
        self.inner
            .lock()
            .map(|i| i.stats(self.capacity))
            .unwrap_or_default()
    }
}

// ─── LRU ─────────────────────────────────────────────────────────────────────

/// Least-recently-used eviction. Reads and re-inserts refresh an entry.
#[derive(Debug)]
pub struct LruCache {
    capacity: usize,
    inner: Mutex<Ordered>,
}

impl LruCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Ordered::default()),
        }
    }
}

impl EmbeddingCache for LruCache {
    fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.lock().ok()?.get(key, true)
    }

    fn put(&self, key: CacheKey, entry: CacheEntry) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.put(key, entry, self.capacity, false);
        }
    }

    fn evict_expired(&self) -> usize {
        self.inner.lock().map(|mut i| i.evict_expired()).unwrap_or(0)
    }

    fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.clear();
        }
    }

    fn stats(&self) -> CacheStats {
        self.inner
            .lock()
            .map(|i| i.stats(self.capacity))
            .unwrap_or_default()
    }
}

/// Build the cache described by config; `None` when caching is disabled.
pub fn create_cache(config: &CacheConfig) -> Option<Arc<dyn EmbeddingCache>> {
    if !config.enabled || config.capacity == 0 {
        return None;
    }
    match config.policy.to_ascii_lowercase().as_str() {
        "lru" => Some(Arc::new(LruCache::new(config.capacity))),
        "fifo" => Some(Arc::new(FifoCache::new(config.capacity))),
        other => {
            tracing::warn!("⚠️ Unknown cache policy '{other}', using fifo");
            Some(Arc::new(FifoCache::new(config.capacity)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(v: f32) -> CacheEntry {
        CacheEntry::new(vec![v], 1, 0.0, None)
    }

    fn key(n: u32) -> CacheKey {
        CacheKey::new(&format!("text {n}"), "text-embedding-3-small")
    }

    #[test]
    fn test_key_depends_on_model() {
        assert_ne!(
            CacheKey::new("hello", "text-embedding-3-small"),
            CacheKey::new("hello", "text-embedding-3-large")
        );
        assert_eq!(CacheKey::new("hello", "m").as_str().len(), 64);
    }

    #[test]
    fn test_fifo_evicts_oldest_inserted() {
        let cache = FifoCache::new(2);
        cache.put(key(1), entry(1.0));
        cache.put(key(2), entry(2.0));
        // Reading key 1 must not save it under FIFO.
        assert!(cache.get(&key(1)).is_some());
        cache.put(key(3), entry(3.0));

        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
        assert!(cache.get(&key(3)).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_keeps_recently_read() {
        let cache = LruCache::new(2);
        cache.put(key(1), entry(1.0));
        cache.put(key(2), entry(2.0));
        assert!(cache.get(&key(1)).is_some());
        cache.put(key(3), entry(3.0));

        assert!(cache.get(&key(1)).is_some());
        assert!(cache.get(&key(2)).is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_hit_count_and_stats() {
        let cache = FifoCache::new(10);
        cache.put(key(1), entry(1.0));
        cache.get(&key(1));
        let second = cache.get(&key(1)).unwrap();
        assert_eq!(second.hit_count, 2);
        assert!(cache.get(&key(9)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_expired_entries_miss() {
        let cache = LruCache::new(10);
        cache.put(key(1), CacheEntry::new(vec![1.0], 1, 0.0, Some(Duration::seconds(-1))));
        cache.put(key(2), CacheEntry::new(vec![2.0], 1, 0.0, Some(Duration::hours(1))));
        assert_eq!(cache.evict_expired(), 1);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
    }

    #[test]
    fn test_create_cache_respects_config() {
        let disabled = CacheConfig {
            enabled: false,
            ..Default::default()
        };
        assert!(create_cache(&disabled).is_none());
        let lru = CacheConfig {
            policy: "lru".into(),
            capacity: 3,
            ..Default::default()
        };
        assert_eq!(create_cache(&lru).unwrap().stats().capacity, 3);
    }
}
