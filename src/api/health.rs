//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::notification::DispatcherStatsSnapshot;
use crate::queue::ConsumerStatsSnapshot;
use crate::ratelimit::RateLimiterStats;
use crate::redis::RedisPoolHealth;
use crate::registry::RegistryStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    /// Absent when no Redis-backed store is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    pub queue: QueueHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub status: &'static str,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueHealthResponse {
    pub enabled: bool,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub dispatcher: DispatcherStatsSnapshot,
    pub registry: RegistryStatsSnapshot,
    pub rate_limit: RateLimiterStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ConsumerStatsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisPoolHealth>,
    pub templates: usize,
    pub notices: usize,
    pub blacklisted_targets: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let engine = &state.engine;

    let redis = engine.redis().map(|pool| {
        let connected = pool.is_healthy();
        RedisHealthResponse {
            status: if connected { "connected" } else { "reconnecting" },
            connected,
        }
    });
    let redis_ok = redis.as_ref().map(|r| r.connected).unwrap_or(true);
    crate::metrics::REDIS_CONNECTION_STATUS.set(i64::from(redis_ok));

    let queue = match engine.transport() {
        Some(transport) => QueueHealthResponse {
            enabled: true,
            backend: transport.backend.backend_name().to_string(),
            depth: transport.backend.len().await,
        },
        None => QueueHealthResponse {
            enabled: false,
            backend: "disabled".to_string(),
            depth: None,
        },
    };

    let status = if redis_ok { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: engine.uptime().as_secs(),
        redis,
        queue,
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let engine = &state.engine;

    Json(StatsResponse {
        dispatcher: engine.dispatcher().stats(),
        registry: engine.registry().stats(),
        rate_limit: engine.rate_limiter().stats(),
        consumer: engine.transport().map(|t| t.consumer.stats()),
        redis: engine.redis().map(|pool| pool.health()),
        templates: engine.templates().count(),
        notices: engine.notices().len(),
        blacklisted_targets: engine.blacklist().len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::engine::NotifyEngine;
    use crate::notification::SendRequest;
    use std::sync::Arc;

    async fn state() -> AppState {
        AppState::new(Arc::new(NotifyEngine::build(Settings::default()).await.unwrap()))
    }

    #[tokio::test]
    async fn test_health_without_redis_is_healthy() {
        let Json(body) = health(State(state().await)).await;
        assert_eq!(body.status, "healthy");
        assert!(body.redis.is_none());
        assert!(body.queue.enabled);
        assert_eq!(body.queue.backend, "memory");
        assert_eq!(body.queue.depth, Some(0));
    }

    #[tokio::test]
    async fn test_stats_reflect_dispatches() {
        let state = state().await;
        let request = SendRequest::builder("s-1", "console", "ops").content("hi").build();
        state.engine.send(&request).await.unwrap();

        let Json(body) = stats(State(state)).await;
        assert_eq!(body.dispatcher.sent, 1);
        assert_eq!(body.registry.cached_instances, 1);
        assert_eq!(body.notices, 1);
        assert!(body.registry.channels.contains(&"console".to_string()));
    }
}
