//! Redis connection pool shared by the Redis-backed idempotency store and
//! queue backend.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::RedisConfig;

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Connection not available: {0}")]
    ConnectionUnavailable(String),
}

/// Connection state reported on `/health` and `/stats`
#[derive(Debug, Clone, Serialize)]
pub struct RedisPoolHealth {
    pub connected: bool,
    pub last_connected_at: Option<DateTime<Utc>>,
    /// Shared connections dropped after a connect failure or broken pipe
    pub connection_drops: u64,
}

/// Redis connection pool.
///
/// Commands share one multiplexed connection. Blocking commands such as
/// `BRPOP` must use `dedicated_connection` so they do not stall the shared one.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    connected: AtomicBool,
    /// Unix millis of the last successful connect, 0 if never
    last_connected_ms: AtomicI64,
    connection_drops: AtomicU64,
    config: RedisConfig,
}

impl RedisPool {
    /// Validate the URL. No connection is made until first use.
    pub fn new(config: RedisConfig) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            connected: AtomicBool::new(false),
            last_connected_ms: AtomicI64::new(0),
            connection_drops: AtomicU64::new(0),
            config,
        })
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.last_connected_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn mark_dropped(&self) {
        self.connected.store(false, Ordering::Release);
        self.connection_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the shared connection, connecting on first use.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        self.connect().await
    }

    async fn connect(&self) -> Result<MultiplexedConnection, PoolError> {
        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                self.mark_connected();
                tracing::info!(url = %self.config.url, "Redis pool connection established");
                Ok(conn)
            }
            Err(e) => {
                self.mark_dropped();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Open a connection that is not shared with other tasks.
    pub async fn dedicated_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(PoolError::Redis)
    }

    /// Run a command on the shared connection, dropping the connection when
    /// the error indicates it is broken so the next call reconnects.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    let mut conn_guard = self.connection.write().await;
                    *conn_guard = None;
                    self.mark_dropped();
                    tracing::warn!(error = %e, "Redis connection lost, reconnecting on next use");
                }
                Err(PoolError::Redis(e))
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn health(&self) -> RedisPoolHealth {
        let last = self.last_connected_ms.load(Ordering::Relaxed);
        RedisPoolHealth {
            connected: self.is_healthy(),
            last_connected_at: (last > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last))
                .flatten(),
            connection_drops: self.connection_drops.load(Ordering::Relaxed),
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }
}
