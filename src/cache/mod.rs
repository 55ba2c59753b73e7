//! Expiring key-value storage
//!
//! Conversation sessions and inbound-message dedupe markers are short-lived
//! values that vanish on expiry. [`ExpiringStore`] is the seam; [`ExpiringCache`]
//! is the in-process implementation.

pub mod store;

pub use store::{spawn_cleanup_task, CacheStats, ExpiringCache};

use async_trait::async_trait;
use std::time::Duration;

use crate::types::Result;

/// Key-value store whose entries expire after a per-entry TTL
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Store `value` only if no live entry exists. Returns whether it was stored.
    async fn set_if_absent(&self, key: &str, value: String, ttl: Duration) -> Result<bool>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of live entries
    pub max_entries: usize,
    /// Cleanup interval
    pub cleanup_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl StoreConfig {
    pub fn new(max_entries: usize, cleanup_interval: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            cleanup_interval,
        }
    }
}
