//! Response caching with a fixed time-to-live.
//!
//! Uses DashMap for concurrent access without a global lock. Entries are
//! immutable once inserted: a `put` replaces, it never updates in place.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Configuration for the response cache.
#[derive(Debug, Clone)]
pub struct ResponseCacheConfig {
    pub ttl: Duration,
    /// Entry count above which a `put` triggers an expiry sweep.
    pub sweep_threshold: usize,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300), // 5 minutes
            sweep_threshold: 100,
        }
    }
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Key/value store whose entries expire a fixed time after insertion.
///
/// The capacity threshold is soft. Exceeding it sweeps out expired entries
/// only; when every entry is still fresh the cache grows past the threshold.
pub struct ResponseCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    config: ResponseCacheConfig,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(config: ResponseCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Return the value stored under `key` if it is younger than the TTL.
    ///
    /// A stale entry is dropped on the way out.
    pub fn get(&self, key: &str) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            if entry.inserted_at.elapsed() < self.config.ttl {
                return Some(entry.value.clone());
            }
        }
        let ttl = self.config.ttl;
        self.entries
            .remove_if(key, |_, entry| entry.inserted_at.elapsed() >= ttl);
        None
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn put(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        if self.entries.len() > self.config.sweep_threshold {
            let removed = self.sweep_expired();
            tracing::debug!(removed, remaining = self.entries.len(), "cache sweep");
        }
    }

    /// Drop the entry for `key`. Returns true if one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.config.ttl;
        self.entries.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
        before.saturating_sub(self.entries.len())
    }

    /// Drop all entries unconditionally.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }
}
