//! Prometheus metrics endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::metrics;
use crate::server::AppState;

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    update_gauges(&state).await;

    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            output,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode Prometheus metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(axum::http::header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

/// Refresh gauges that are sampled rather than counted
async fn update_gauges(state: &AppState) {
    if let Some(transport) = state.engine.transport() {
        if let Some(depth) = transport.backend.len().await {
            metrics::QUEUE_DEPTH.set(depth as i64);
        }
    }

    if let Some(pool) = state.engine.redis() {
        metrics::REDIS_CONNECTION_STATUS.set(i64::from(pool.is_healthy()));
    }
}
