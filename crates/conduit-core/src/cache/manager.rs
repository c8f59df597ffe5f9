//! Two-tier cache manager.
//!
//! Read path: memory tier first, persistent tier on miss (with promotion into
//! memory). Entries whose age exceeds the applicable TTL are deleted at
//! discovery and reported as misses. Write path: persistent tier best-effort,
//! then memory. A persistent-tier failure never fails a request - the store
//! is advisory.
//!
//! Also owns the duplicate-window throttle: a fingerprint seen twice within
//! ~100 ms gets a randomized 50-150 ms delay before its upstream miss path
//! runs, giving the first request time to populate the cache.

use crate::{
    cache::{
        memory::{CacheEntry, MemoryCache},
        policy::Ttl,
        store::{SqliteStore, StoreStats},
    },
    clock::Clock,
    types::{JsonRpcResponse, JSONRPC_VERSION},
};
use dashmap::DashMap;
use serde_json::Value;
use std::{
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Two sightings of a key closer than this trigger the duplicate delay.
const DUPLICATE_TRIGGER_MS: u64 = 100;
/// Lower bound of the randomized duplicate delay.
const DUPLICATE_MIN_DELAY_MS: u64 = 50;
/// Random extra on top of the minimum delay.
const DUPLICATE_EXTRA_DELAY_MS: u64 = 100;
/// Duplicate-window entries are pruned once the map grows past this.
const DUPLICATE_WINDOW_PRUNE_LEN: usize = 4096;

/// Interval between TTL sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Cache manager configuration, derived from the `cache.*` config section.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Global retention for volatile entries; zero means infinite retention
    /// (the sweeper is skipped entirely).
    pub max_age: Duration,
    /// Memory tier capacity in entries.
    pub max_size: NonZeroUsize,
}

/// Aggregate counters and sizes, served by `/cache/stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub persistent: Option<StoreStats>,
}

pub struct CacheManager {
    memory: MemoryCache,
    store: Option<SqliteStore>,
    duplicate_window: DashMap<String, u64>,
    clock: Arc<dyn Clock>,
    settings: CacheSettings,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl CacheManager {
    #[must_use]
    pub fn new(settings: CacheSettings, store: Option<SqliteStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            memory: MemoryCache::new(settings.max_size),
            store,
            duplicate_window: DashMap::new(),
            clock,
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// The operator-configured TTL for volatile entries.
    #[must_use]
    pub fn volatile_ttl(&self) -> Duration {
        self.settings.max_age
    }

    /// Two-tier read-through lookup.
    ///
    /// Returns the stored envelope with its id rewritten to `request_id`, or
    /// `None` on miss. Expired entries found on either tier are deleted
    /// before the miss is reported.
    pub async fn lookup(
        &self,
        key: &str,
        ttl: Ttl,
        request_id: &Arc<Value>,
    ) -> Option<JsonRpcResponse> {
        let now = self.clock.now_millis();

        if let Some(entry) = self.memory.get(key) {
            if is_expired(entry.age_ms(now), ttl) {
                debug!(key, age_ms = entry.age_ms(now), "expired entry removed at lookup");
                self.memory.remove(key);
                self.delete_persistent(key).await;
            } else {
                self.memory.mark_read(key);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(serve_payload(&entry.payload, request_id));
            }
        }

        let Some(store) = self.store.as_ref() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        match store.get(key).await {
            Ok(Some((text, ts))) => {
                let inserted_at = u64::try_from(ts).unwrap_or(0);
                if is_expired(now.saturating_sub(inserted_at), ttl) {
                    self.delete_persistent(key).await;
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                match serde_json::from_str::<Value>(&text) {
                    Ok(payload) => {
                        let size = text.len() as u64;
                        let mut entry = CacheEntry::new(payload.clone(), inserted_at, size);
                        entry.read_count = 1;
                        self.memory.insert_promoted(key, entry);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        Some(serve_payload(&payload, request_id))
                    }
                    Err(err) => {
                        warn!(key, error = %err, "corrupt persistent entry dropped");
                        self.delete_persistent(key).await;
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                }
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                warn!(key, error = %err, "persistent tier read failed, continuing memory-only");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write-through: persistent tier (best effort) then memory.
    pub async fn store_response(&self, key: &str, response: &JsonRpcResponse) {
        let payload = match serde_json::to_value(response) {
            Ok(v) => v,
            Err(err) => {
                warn!(key, error = %err, "response not serializable, skipping cache write");
                return;
            }
        };
        let text = payload.to_string();
        let now = self.clock.now_millis();

        if let Some(store) = &self.store {
            if let Err(err) = store.put(key, &text, to_db_ts(now)).await {
                warn!(key, error = %err, "persistent tier write failed");
            }
        }
        self.memory.upsert(key, payload, now, text.len() as u64);
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes a key from both tiers.
    pub async fn invalidate(&self, key: &str) {
        self.memory.remove(key);
        self.delete_persistent(key).await;
    }

    /// Empties both tiers.
    pub async fn clear(&self) {
        self.memory.clear();
        if let Some(store) = &self.store {
            if let Err(err) = store.clear().await {
                warn!(error = %err, "persistent tier clear failed");
            }
        }
        info!("cache cleared");
    }

    /// Duplicate-window throttle.
    ///
    /// Called on the upstream-miss path (after the cache lookup, before the
    /// upstream attempt). If the same key was seen within the trigger window,
    /// sleeps a randomized 50-150 ms so a concurrent sibling can populate the
    /// cache first. Always records the current sighting.
    pub async fn delay_duplicate(&self, key: &str) {
        let now = self.clock.now_millis();
        let previous = self.duplicate_window.insert(key.to_string(), now);

        if self.duplicate_window.len() > DUPLICATE_WINDOW_PRUNE_LEN {
            self.duplicate_window.retain(|_, seen| now.saturating_sub(*seen) < DUPLICATE_TRIGGER_MS);
        }

        if let Some(prev) = previous {
            if now.saturating_sub(prev) < DUPLICATE_TRIGGER_MS {
                use rand::Rng;
                let delay = rand::rng()
                    .random_range(DUPLICATE_MIN_DELAY_MS..DUPLICATE_MIN_DELAY_MS + DUPLICATE_EXTRA_DELAY_MS);
                debug!(key, delay_ms = delay, "throttling duplicate request");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }

    /// Starts the hourly TTL sweep task. With `max_age = 0` the task still
    /// runs but every sweep is a no-op (infinite retention).
    pub fn start_sweeper(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + SWEEP_INTERVAL;
            let mut ticker = tokio::time::interval_at(start, SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => manager.sweep().await,
                    _ = shutdown_rx.recv() => {
                        debug!("cache sweeper shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// One sweep pass: drops entries older than the global max age from both
    /// tiers. Skipped when retention is infinite.
    pub async fn sweep(&self) {
        if self.settings.max_age.is_zero() {
            return;
        }
        let max_age_ms = u64::try_from(self.settings.max_age.as_millis()).unwrap_or(u64::MAX);
        let cutoff = self.clock.now_millis().saturating_sub(max_age_ms);

        let mut removed = 0usize;
        for (key, inserted_at) in self.memory.snapshot_oldest_first() {
            if inserted_at < cutoff {
                self.memory.remove(&key);
                removed += 1;
            }
        }

        let mut persistent_removed = 0u64;
        if let Some(store) = &self.store {
            match store.delete_older_than(to_db_ts(cutoff)).await {
                Ok(n) => persistent_removed = n,
                Err(err) => warn!(error = %err, "persistent sweep failed"),
            }
        }

        if removed > 0 || persistent_removed > 0 {
            info!(memory = removed, persistent = persistent_removed, "TTL sweep complete");
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let persistent = match &self.store {
            Some(store) => store.stats().await.ok(),
            None => None,
        };
        CacheStats {
            memory_entries: self.memory.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            persistent,
        }
    }

    /// Closes the persistent tier.
    pub async fn close(&self) {
        if let Some(store) = &self.store {
            store.close().await;
        }
    }

    async fn delete_persistent(&self, key: &str) {
        if let Some(store) = &self.store {
            if let Err(err) = store.delete(key).await {
                warn!(key, error = %err, "persistent tier delete failed");
            }
        }
    }
}

fn is_expired(age_ms: u64, ttl: Ttl) -> bool {
    match ttl.as_millis() {
        None => false,
        Some(limit) => age_ms > limit,
    }
}

fn to_db_ts(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

/// Serving-form rule: a stored JSON-RPC envelope is returned with the id
/// substituted; any other payload is treated as a bare result (legacy form)
/// and wrapped into a fresh envelope under the caller's id.
fn serve_payload(payload: &Value, request_id: &Arc<Value>) -> JsonRpcResponse {
    if is_envelope(payload) {
        if let Ok(response) = serde_json::from_value::<JsonRpcResponse>(payload.clone()) {
            return response.with_id(Arc::clone(request_id));
        }
    }
    JsonRpcResponse::success(payload.clone(), Arc::clone(request_id))
}

fn is_envelope(payload: &Value) -> bool {
    payload.as_object().is_some_and(|obj| {
        obj.get("jsonrpc").and_then(Value::as_str) == Some(JSONRPC_VERSION)
            && (obj.contains_key("result") || obj.contains_key("error"))
    })
}
