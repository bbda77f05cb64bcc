//! Redis list-backed queue: `LPUSH` to enqueue, `BRPOP` to dequeue.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::QueueBackend;
use crate::error::{DispatchError, Result};
use crate::redis::{PoolError, RedisPool};

/// Queue stored in the Redis list `{prefix}:{name}`.
pub struct RedisQueueBackend {
    pool: Arc<RedisPool>,
    key: String,
    /// Connection reserved for `BRPOP` so blocking reads do not stall the
    /// shared multiplexed connection.
    blocking: Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl RedisQueueBackend {
    pub fn new(pool: Arc<RedisPool>, prefix: &str, name: &str) -> Self {
        Self {
            pool,
            key: format!("{}:{}", prefix, name),
            blocking: Mutex::new(None),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn map_err(e: PoolError) -> DispatchError {
        DispatchError::Queue(e.to_string())
    }
}

#[async_trait]
impl QueueBackend for RedisQueueBackend {
    async fn push(&self, payload: String) -> Result<()> {
        let key = self.key.clone();
        self.pool
            .execute(|mut conn| async move {
                let _: i64 = redis::cmd("LPUSH")
                    .arg(&key)
                    .arg(payload)
                    .query_async(&mut conn)
                    .await?;
                Ok(())
            })
            .await
            .map_err(Self::map_err)
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let mut guard = self.blocking.lock().await;
        let mut conn = match guard.as_ref() {
            Some(conn) => conn.clone(),
            None => {
                let conn = self
                    .pool
                    .dedicated_connection()
                    .await
                    .map_err(Self::map_err)?;
                *guard = Some(conn.clone());
                conn
            }
        };

        // BRPOP takes fractional seconds; 0 would block forever
        let seconds = timeout.as_secs_f64().max(0.01);

        let reply: redis::RedisResult<Option<(String, String)>> = redis::cmd("BRPOP")
            .arg(&self.key)
            .arg(seconds)
            .query_async(&mut conn)
            .await;

        match reply {
            Ok(item) => Ok(item.map(|(_, payload)| payload)),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    *guard = None;
                }
                Err(DispatchError::Queue(e.to_string()))
            }
        }
    }

    async fn len(&self) -> Option<usize> {
        let key = self.key.clone();
        self.pool
            .execute(|mut conn| async move {
                let len: usize = redis::cmd("LLEN").arg(&key).query_async(&mut conn).await?;
                Ok(len)
            })
            .await
            .ok()
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
        let backend = RedisQueueBackend::new(Arc::new(pool), "notify:queue", "default");
        assert_eq!(backend.key(), "notify:queue:default");
    }
}
