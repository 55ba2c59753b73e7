//! Inbound message dedupe
//!
//! The chat provider may redeliver a webhook. Each message claims a marker in
//! the expiring store before any session state is touched; a second claim for
//! the same message fails and the delivery is dropped.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ExpiringStore;
use crate::chat::input::InboundMessage;
use crate::types::Result;

/// Width of the time bucket for messages without an id
const FALLBACK_BUCKET_SECS: i64 = 10;
const FALLBACK_TTL: Duration = Duration::from_secs(600);

pub struct MessageDeduplicator {
    store: Arc<dyn ExpiringStore>,
    ttl: Duration,
}

impl MessageDeduplicator {
    pub fn new(store: Arc<dyn ExpiringStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Claim the message. Returns `false` if it was already seen.
    pub async fn claim(&self, message: &InboundMessage) -> Result<bool> {
        let (key, ttl) = match &message.message_id {
            Some(id) => (format!("dedupe:msg:{}", id), self.ttl),
            None => {
                let bucket = Utc::now().timestamp() / FALLBACK_BUCKET_SECS;
                (fallback_key(&message.from, &message.text, bucket), FALLBACK_TTL)
            }
        };
        self.store.set_if_absent(&key, "1".to_string(), ttl).await
    }
}

fn fallback_key(from: &str, text: &str, bucket: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from.as_bytes());
    hasher.update(b"|");
    hasher.update(text.to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.to_string().as_bytes());
    format!("dedupe:fallback:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ExpiringCache;

    fn message(id: Option<&str>, text: &str) -> InboundMessage {
        InboundMessage {
            from: "919876543210".into(),
            text: text.into(),
            message_id: id.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_same_id_claimed_once() {
        let dedupe = MessageDeduplicator::new(
            Arc::new(ExpiringCache::with_defaults()),
            Duration::from_secs(60),
        );

        assert!(dedupe.claim(&message(Some("m1"), "mcq")).await.unwrap());
        assert!(!dedupe.claim(&message(Some("m1"), "mcq")).await.unwrap());
        assert!(dedupe.claim(&message(Some("m2"), "mcq")).await.unwrap());
    }

    #[test]
    fn test_fallback_key_varies_by_bucket() {
        assert_eq!(fallback_key("a", "X", 1), fallback_key("a", "x", 1));
        assert_ne!(fallback_key("a", "x", 1), fallback_key("a", "x", 2));
        assert_ne!(fallback_key("a", "x", 1), fallback_key("b", "x", 1));
    }
}
