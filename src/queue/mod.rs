//! Async transport: a single named queue of JSON-encoded `SendRequest`s.
//!
//! `NotificationProducer` pushes, `NotificationConsumer` runs a pool of
//! workers that pop and dispatch. Backends are selected by
//! `create_queue_backend`.

mod consumer;
mod memory_backend;
mod producer;
mod redis_backend;

pub use consumer::{ConsumerStats, ConsumerStatsSnapshot, NotificationConsumer};
pub use memory_backend::MemoryQueueBackend;
pub use producer::NotificationProducer;
pub use redis_backend::RedisQueueBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::redis::RedisPool;

#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append a payload to the queue.
    async fn push(&self, payload: String) -> Result<()>;

    /// Take the oldest payload, waiting at most `timeout`.
    /// Returns `None` when nothing arrived in time.
    async fn pop(&self, timeout: Duration) -> Result<Option<String>>;

    /// Payloads waiting, when the backend can tell cheaply
    async fn len(&self) -> Option<usize> {
        None
    }

    fn backend_name(&self) -> &'static str;
}

/// Create a queue backend from settings.
///
/// - `"redis"`: `RedisQueueBackend` when a pool is available
/// - `"memory"` (default): `MemoryQueueBackend`
pub fn create_queue_backend(
    settings: &QueueConfig,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn QueueBackend> {
    match settings.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    queue = %settings.name,
                    prefix = %settings.redis_prefix,
                    "Creating Redis queue backend"
                );
                Arc::new(RedisQueueBackend::new(
                    pool,
                    &settings.redis_prefix,
                    &settings.name,
                ))
            } else {
                tracing::warn!("Redis queue backend requested but no pool provided, falling back to memory");
                Arc::new(MemoryQueueBackend::new())
            }
        }
        _ => {
            tracing::info!(backend = "memory", queue = %settings.name, "Creating memory queue backend");
            Arc::new(MemoryQueueBackend::new())
        }
    }
}
