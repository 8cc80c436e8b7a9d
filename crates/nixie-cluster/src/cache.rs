//! Activation-location cache
//!
//! Per-server bounded cache of actor-to-reference lookups. Best effort: a
//! miss costs one registry round-trip; a stale hit costs at most one
//! failed invocation that gets retried after the entry expires. Entries
//! are evicted by count (uniform cost), not by size.

use nixie_core::constants::{
    ACTIVATION_CACHE_ENTRIES_COUNT_MAX, ACTIVATION_CACHE_SWEEP_INTERVAL_MS,
};
use nixie_core::{ActorReference, TimeProvider};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

struct CacheEntry {
    references: Vec<ActorReference>,
    expires_at_ms: u64,
    /// Insertion order, used for eviction at capacity.
    seq: u64,
}

/// Bounded TTL cache of `namespace || actor_id` to reference list
pub struct ActivationCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    capacity: usize,
    seq: AtomicU64,
    time: Arc<dyn TimeProvider>,
    shutdown: Arc<Notify>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ActivationCache {
    /// Create a cache with the default capacity and start its background
    /// sweeper
    pub fn new(time: Arc<dyn TimeProvider>) -> Arc<Self> {
        Self::with_capacity(ACTIVATION_CACHE_ENTRIES_COUNT_MAX, time)
    }

    /// Create a cache with a custom capacity and start its background
    /// sweeper
    pub fn with_capacity(capacity: usize, time: Arc<dyn TimeProvider>) -> Arc<Self> {
        assert!(capacity > 0, "cache capacity must be positive");
        let cache = Arc::new(Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            seq: AtomicU64::new(0),
            time: time.clone(),
            shutdown: Arc::new(Notify::new()),
            sweeper: Mutex::new(None),
        });

        let weak = Arc::downgrade(&cache);
        let shutdown = cache.shutdown.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = time.sleep_ms(ACTIVATION_CACHE_SWEEP_INTERVAL_MS) => {
                        let Some(cache) = Weak::upgrade(&weak) else { break };
                        cache.sweep();
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });
        *cache.sweeper.lock().expect("sweeper lock poisoned") = Some(task);

        cache
    }

    /// Look up a non-expired entry
    pub fn get(&self, key: &str) -> Option<Vec<ActorReference>> {
        let now_ms = self.time.now_ms();
        let entries = self.entries.read().expect("cache lock poisoned");
        entries
            .get(key)
            .filter(|entry| entry.expires_at_ms > now_ms)
            .map(|entry| entry.references.clone())
    }

    /// Insert an entry with the given TTL, evicting if at capacity
    pub fn insert(&self, key: String, references: Vec<ActorReference>, ttl_ms: u64) {
        let now_ms = self.time.now_ms();
        let mut entries = self.entries.write().expect("cache lock poisoned");

        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            entries.retain(|_, entry| entry.expires_at_ms > now_ms);
            // Still full after dropping expired entries: evict the oldest.
            if entries.len() >= self.capacity {
                if let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.seq)
                    .map(|(key, _)| key.clone())
                {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                references,
                expires_at_ms: now_ms.saturating_add(ttl_ms),
                seq: self.seq.fetch_add(1, Ordering::SeqCst),
            },
        );
    }

    /// Drop expired entries
    pub fn sweep(&self) {
        let now_ms = self.time.now_ms();
        let mut entries = self.entries.write().expect("cache lock poisoned");
        entries.retain(|_, entry| entry.expires_at_ms > now_ms);
    }

    /// Number of live (possibly expired, not yet swept) entries
    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop the background sweeper
    pub async fn close(&self) {
        self.shutdown.notify_one();
        let task = self.sweeper.lock().expect("sweeper lock poisoned").take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}
