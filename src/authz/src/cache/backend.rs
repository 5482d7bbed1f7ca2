//! Key-value backends for the permission cache

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Key-value store with per-key atomic get/set/delete and TTL support
///
/// Implementations may be remote (network round-trips, transient failures);
/// callers treat every error as a cache miss.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetch a value; `None` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value for `ttl`
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Remove a key
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Stored value with TTL
#[derive(Debug, Clone)]
struct CachedValue {
    value: String,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedValue {
    fn new(value: String, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// In-process backend built on DashMap
///
/// Provides:
/// - per-key atomicity through DashMap shard locks
/// - TTL expiry checked on read
/// - bounded size with batch eviction of expired, then arbitrary, entries
pub struct MemoryBackend {
    entries: Arc<DashMap<String, CachedValue>>,
    capacity: usize,
}

impl MemoryBackend {
    /// Create a backend holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the backend holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry
    pub fn cleanup_expired(&self) {
        self.entries.retain(|_, entry| !entry.is_expired());
    }

    fn evict(&self) {
        self.cleanup_expired();
        if self.entries.len() < self.capacity {
            return;
        }

        // Remove up to 10% of entries
        let to_remove = (self.capacity / 10).max(1);
        let mut removed = 0;
        self.entries.retain(|_, _| {
            if removed < to_remove {
                removed += 1;
                false
            } else {
                true
            }
        });
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            // A concurrent set may have replaced the expired value
            self.entries.remove_if(key, |_, value| value.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        if !self.entries.contains_key(key) && self.entries.len() >= self.capacity {
            self.evict();
        }
        self.entries.insert(key.to_string(), CachedValue::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
