//! In-memory expiring store with capacity bound and periodic cleanup.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{ExpiringStore, StoreConfig};
use crate::types::Result;

/// A stored value with its expiry
#[derive(Debug, Clone)]
struct StoredEntry {
    value: String,
    created_at: Instant,
    expires_at: Instant,
}

impl StoredEntry {
    fn new(value: String, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            value,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Store statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// In-memory expiring store
pub struct ExpiringCache {
    entries: DashMap<String, StoredEntry>,
    config: StoreConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ExpiringCache {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(StoreConfig::default())
    }

    fn lookup(&self, key: &str) -> Option<String> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            // Release the read guard before removing
            drop(entry);
            self.entries.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn insert(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .insert(key.to_string(), StoredEntry::new(value, ttl));
        self.maybe_evict();
    }

    fn insert_if_absent(&self, key: &str, value: String, ttl: Duration) -> bool {
        let stored = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(StoredEntry::new(value, ttl));
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(StoredEntry::new(value, ttl));
                true
            }
        };

        if stored {
            self.maybe_evict();
        }
        stored
    }

    /// Remove expired entries
    pub fn cleanup(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            debug!(count = count, "Cleaned up expired entries");
        }
        count
    }

    /// Get store statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Evict entries if over capacity (oldest first)
    fn maybe_evict(&self) {
        if self.entries.len() <= self.config.max_entries {
            return;
        }

        self.cleanup();
        if self.entries.len() <= self.config.max_entries {
            return;
        }

        let to_evict = self.entries.len() - self.config.max_entries;

        let mut entries: Vec<(String, Instant)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.created_at))
            .collect();

        entries.sort_by_key(|(_, created)| *created);

        for (key, _) in entries.into_iter().take(to_evict) {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }

        debug!(evicted = to_evict, "Evicted oldest entries");
    }
}

impl Default for ExpiringCache {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[async_trait]
impl ExpiringStore for ExpiringCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool> {
        Ok(self.insert_if_absent(key, value, ttl))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Spawn a background task to periodically cleanup expired entries
pub fn spawn_cleanup_task(cache: Arc<ExpiringCache>) -> tokio::task::JoinHandle<()> {
    let interval = cache.config.cleanup_interval;

    let handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let removed = cache.cleanup();
            let stats = cache.stats();
            debug!(
                removed = removed,
                entries = stats.entries,
                hit_rate = format!("{:.1}%", stats.hit_rate()),
                "Session store cleanup completed"
            );
        }
    });

    info!("Session store cleanup task started");
    handle
}
