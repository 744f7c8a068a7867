//! Replay protection storage for webhook nonces.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
#[error("nonce store unavailable: {0}")]
pub struct NonceStoreError(pub String);

#[async_trait]
pub trait NonceStore: Send + Sync {
    async fn seen(&self, nonce: &str) -> Result<bool, NonceStoreError>;

    /// Record the nonce for `ttl`. Returns false when it was already present.
    async fn record(&self, nonce: &str, ttl: Duration) -> Result<bool, NonceStoreError>;
}

/// Process-local nonce store, pruned lazily on every write.
#[derive(Default)]
pub struct MemoryNonceStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn seen(&self, nonce: &str) -> Result<bool, NonceStoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(nonce)
            .map_or(false, |expires| *expires > Instant::now()))
    }

    async fn record(&self, nonce: &str, ttl: Duration) -> Result<bool, NonceStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, expires| *expires > now);
        if entries.contains_key(nonce) {
            return Ok(false);
        }
        entries.insert(nonce.to_string(), now + ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_record_loses() {
        let store = MemoryNonceStore::new();
        assert!(!store.seen("n-1").await.unwrap());
        assert!(store.record("n-1", Duration::from_secs(600)).await.unwrap());
        assert!(store.seen("n-1").await.unwrap());
        assert!(!store.record("n-1", Duration::from_secs(600)).await.unwrap());
    }

    #[tokio::test]
    async fn expired_nonces_are_forgotten() {
        let store = MemoryNonceStore::new();
        assert!(store.record("n-2", Duration::from_millis(0)).await.unwrap());
        assert!(!store.seen("n-2").await.unwrap());
        assert!(store.record("n-2", Duration::from_secs(1)).await.unwrap());
    }
}
