use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::webhook::nonce::{NonceStore, NonceStoreError};

const NONCE_PREFIX: &str = "webhook:nonce:";

/// Redis-backed nonce store shared by every instance behind the load balancer.
#[derive(Clone)]
pub struct RedisNonceStore {
    redis_client: redis::Client,
}

impl RedisNonceStore {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, NonceStoreError> {
        self.redis_client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| NonceStoreError(e.to_string()))
    }
}

#[async_trait]
impl NonceStore for RedisNonceStore {
    async fn seen(&self, nonce: &str) -> Result<bool, NonceStoreError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", NONCE_PREFIX, nonce);
        conn.exists(&key)
            .await
            .map_err(|e| NonceStoreError(e.to_string()))
    }

    async fn record(&self, nonce: &str, ttl: Duration) -> Result<bool, NonceStoreError> {
        let mut conn = self.connection().await?;
        let key = format!("{}{}", NONCE_PREFIX, nonce);

        // SET NX EX: only the first writer gets "OK" back
        let stored: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| NonceStoreError(e.to_string()))?;
        Ok(stored.is_some())
    }
}
