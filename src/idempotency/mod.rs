//! Idempotency store.
//!
//! Records the receipt of every successful send under `(tenant, request_id)`
//! so a repeated request returns the original receipt without another
//! provider call.

mod memory;
mod redis_store;

pub use memory::MemoryIdempotencyStore;
pub use redis_store::RedisIdempotencyStore;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::IdempotencyConfig;
use crate::error::Result;
use crate::notification::SendReceipt;
use crate::redis::RedisPool;

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Whether a receipt is recorded for this request
    async fn exists(&self, tenant_id: &str, request_id: &str) -> Result<bool> {
        Ok(self.get(tenant_id, request_id).await?.is_some())
    }

    async fn get(&self, tenant_id: &str, request_id: &str) -> Result<Option<SendReceipt>>;

    /// Record a receipt. Overwrites any previous record.
    async fn put(&self, tenant_id: &str, request_id: &str, receipt: &SendReceipt) -> Result<()>;

    /// Drop expired records. Backends with native expiry return 0.
    async fn cleanup_expired(&self) -> usize {
        0
    }

    fn backend_name(&self) -> &'static str;
}

/// Create an idempotency store from settings.
///
/// - `"redis"`: `RedisIdempotencyStore` when a pool is available
/// - `"memory"` (default): `MemoryIdempotencyStore`
pub fn create_idempotency_store(
    settings: &IdempotencyConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn IdempotencyStore> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    prefix = %settings.redis_prefix,
                    ttl_seconds = settings.ttl_seconds,
                    "Creating Redis idempotency store"
                );
                Arc::new(RedisIdempotencyStore::new(
                    pool,
                    settings.redis_prefix.clone(),
                    settings.ttl_seconds,
                ))
            } else {
                tracing::warn!("Redis idempotency store requested but no pool provided, falling back to memory");
                Arc::new(MemoryIdempotencyStore::new(settings.ttl_seconds))
            }
        }
        _ => {
            tracing::info!(backend = "memory", ttl_seconds = settings.ttl_seconds, "Creating memory idempotency store");
            Arc::new(MemoryIdempotencyStore::new(settings.ttl_seconds))
        }
    }
}
