//! Bounded in-memory cache tier with strict LRU eviction.
//!
//! Recency is updated on both reads and writes; when the cache is full an
//! insert evicts the least-recently-used entry. Iteration for sweeps runs
//! oldest-recency-first.

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::num::NonZeroUsize;

/// One cached response plus bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Either a full JSON-RPC envelope (preferred) or a bare result value
    /// (legacy form); the manager wraps the latter when serving.
    pub payload: Value,
    /// Insertion timestamp, monotonic ms from epoch.
    pub inserted_at: u64,
    pub read_count: u64,
    pub write_count: u64,
    pub compressed: bool,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl CacheEntry {
    #[must_use]
    pub fn new(payload: Value, inserted_at: u64, size: u64) -> Self {
        Self {
            payload,
            inserted_at,
            read_count: 0,
            write_count: 1,
            // Compression at rest is modeled but not enabled.
            compressed: false,
            original_size: size,
            compressed_size: size,
        }
    }

    /// Entry age relative to `now_ms`, saturating for clock skew.
    #[must_use]
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.inserted_at)
    }
}

/// The memory tier. All operations are total; the lock is held only for the
/// duration of a single map operation.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns a copy of the entry and marks the key most-recently-used.
    ///
    /// Does not touch `read_count`; callers confirm the entry is still live
    /// (TTL) before recording a hit via [`mark_read`](Self::mark_read).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().get(key).cloned()
    }

    /// Increments `read_count` after a confirmed hit.
    pub fn mark_read(&self, key: &str) {
        if let Some(entry) = self.inner.lock().get_mut(key) {
            entry.read_count += 1;
        }
    }

    /// Membership check without recency promotion.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains(key)
    }

    /// Inserts or replaces the payload under `key`, promoting it to
    /// most-recently-used. An existing entry keeps its monotonic
    /// `write_count`; a new insert at capacity evicts the LRU entry first.
    pub fn upsert(&self, key: &str, payload: Value, now_ms: u64, size: u64) {
        let mut cache = self.inner.lock();
        if let Some(entry) = cache.get_mut(key) {
            entry.payload = payload;
            entry.inserted_at = now_ms;
            entry.write_count += 1;
            entry.original_size = size;
            entry.compressed_size = size;
        } else {
            cache.put(key.to_string(), CacheEntry::new(payload, now_ms, size));
        }
    }

    /// Inserts an entry promoted from the persistent tier, preserving its
    /// original insertion timestamp.
    pub fn insert_promoted(&self, key: &str, entry: CacheEntry) {
        self.inner.lock().put(key.to_string(), entry);
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().pop(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Snapshot of `(key, inserted_at)` pairs, least-recently-used first.
    #[must_use]
    pub fn snapshot_oldest_first(&self) -> Vec<(String, u64)> {
        self.inner
            .lock()
            .iter()
            .rev()
            .map(|(k, e)| (k.clone(), e.inserted_at))
            .collect()
    }
}
