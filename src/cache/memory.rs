//! In-process fallback store.
//!
//! Bounded LRU of composite key to encoded payload. Entries carry an absolute
//! expiry checked lazily on read. Reads peek, so recency follows writes: when
//! a new key would exceed capacity the least recently written fifth of the
//! entries is evicted first.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use tokio::time::Instant;
use tracing::debug;

use crate::util::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::memory";
const METRIC_EVICT: &str = "hemicycle_cache_memory_evict_total";
/// Fraction of the store evicted at capacity, as a divisor.
const EVICT_DIVISOR: usize = 5;

#[derive(Debug, Clone)]
struct MemoryEntry {
    payload: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Bounded in-process key/value store with lazy TTL expiry.
pub struct MemoryStore {
    entries: RwLock<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    /// Store `payload` under `key` for `ttl`, replacing any previous entry.
    pub fn insert(&self, key: &str, payload: Vec<u8>, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        let mut entries = rw_write(&self.entries, SOURCE, "insert");

        if !entries.contains(key) && entries.len() >= entries.cap().get() {
            let evicted = (entries.len() / EVICT_DIVISOR).max(1);
            for _ in 0..evicted {
                entries.pop_lru();
            }
            counter!(METRIC_EVICT).increment(evicted as u64);
            debug!(
                component = SOURCE,
                evicted,
                capacity = entries.cap().get(),
                "in-process cache at capacity"
            );
        }

        entries.put(
            key.to_string(),
            MemoryEntry {
                payload,
                expires_at,
            },
        );
    }

    /// Payload stored under `key`, dropping it first if it has expired.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let entries = rw_read(&self.entries, SOURCE, "get");
            match entries.peek(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.payload.clone()),
                Some(_) => {}
            }
        }

        let mut entries = rw_write(&self.entries, SOURCE, "get.expire");
        if entries.peek(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.pop(key);
        }
        None
    }

    pub fn remove(&self, key: &str) -> bool {
        rw_write(&self.entries, SOURCE, "remove").pop(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "remove_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        rw_read(&self.entries, SOURCE, "capacity").cap().get()
    }
}
