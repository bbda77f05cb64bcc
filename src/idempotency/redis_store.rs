use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::IdempotencyStore;
use crate::error::{DispatchError, Result};
use crate::notification::SendReceipt;
use crate::redis::{PoolError, RedisPool};

/// Idempotency records as JSON strings under `{prefix}:{tenant}:{request_id}`,
/// expired by Redis (`SET ... EX`).
pub struct RedisIdempotencyStore {
    pool: Arc<RedisPool>,
    prefix: String,
    ttl_seconds: u64,
}

impl RedisIdempotencyStore {
    pub fn new(pool: Arc<RedisPool>, prefix: String, ttl_seconds: u64) -> Self {
        Self {
            pool,
            prefix,
            ttl_seconds,
        }
    }

    fn key(&self, tenant_id: &str, request_id: &str) -> String {
        format!("{}:{}:{}", self.prefix, tenant_id, request_id)
    }
}

fn store_error(e: PoolError) -> DispatchError {
    DispatchError::Store(e.to_string())
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn exists(&self, tenant_id: &str, request_id: &str) -> Result<bool> {
        let key = self.key(tenant_id, request_id);
        self.pool
            .execute(|mut conn| async move { conn.exists(&key).await })
            .await
            .map_err(store_error)
    }

    async fn get(&self, tenant_id: &str, request_id: &str) -> Result<Option<SendReceipt>> {
        let key = self.key(tenant_id, request_id);
        let raw: Option<String> = self
            .pool
            .execute(|mut conn| async move { conn.get(&key).await })
            .await
            .map_err(store_error)?;

        raw.map(|json| serde_json::from_str(&json).map_err(DispatchError::from))
            .transpose()
    }

    async fn put(&self, tenant_id: &str, request_id: &str, receipt: &SendReceipt) -> Result<()> {
        let key = self.key(tenant_id, request_id);
        let json = serde_json::to_string(receipt)?;
        let ttl = self.ttl_seconds;

        self.pool
            .execute(|mut conn| async move {
                if ttl > 0 {
                    conn.set_ex::<_, _, ()>(&key, json, ttl).await
                } else {
                    conn.set::<_, _, ()>(&key, json).await
                }
            })
            .await
            .map_err(store_error)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    #[test]
    fn test_key_layout() {
        let pool = RedisPool::new(RedisConfig::default()).unwrap();
        let store = RedisIdempotencyStore::new(Arc::new(pool), "notify:idempotency".into(), 60);
        assert_eq!(store.key("acme", "r-1"), "notify:idempotency:acme:r-1");
        assert_eq!(store.backend_name(), "redis");
    }
}
