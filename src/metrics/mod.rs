//! Prometheus metrics for the dispatch engine.
//!
//! - Dispatch metrics (requests, sends, failures, short-circuits, latency)
//! - Template render latency
//! - Queue transport metrics
//! - Redis health
//! - Ops HTTP requests

mod instrumentation;

pub use instrumentation::PrometheusInstrumentation;

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "notify";

lazy_static! {
    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Requests entering the pipeline, by channel
    pub static ref DISPATCH_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_requests_total", METRIC_PREFIX),
        "Total notification requests received by the dispatcher",
        &["channel"]
    ).unwrap();

    pub static ref NOTIFICATIONS_SENT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_sent_total", METRIC_PREFIX),
        "Total notifications accepted by a provider",
        &["channel"]
    ).unwrap();

    /// Failures by channel and root error code
    pub static ref NOTIFICATIONS_FAILED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_failed_total", METRIC_PREFIX),
        "Total notifications that failed to send",
        &["channel", "code"]
    ).unwrap();

    /// Requests that left the pipeline before dispatch
    pub static ref SHORT_CIRCUIT_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_short_circuit_total", METRIC_PREFIX),
        "Requests answered without a provider call",
        &["reason"]
    ).unwrap();

    pub static ref DISPATCH_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_dispatch_latency_seconds", METRIC_PREFIX),
        "Provider dispatch latency including retries",
        &["channel"],
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    pub static ref DISPATCH_ATTEMPTS: Histogram = register_histogram!(
        format!("{}_dispatch_attempts", METRIC_PREFIX),
        "Provider attempts per successful send",
        vec![1.0, 2.0, 3.0, 4.0, 5.0, 10.0]
    ).unwrap();

    // ============================================================================
    // Template Metrics
    // ============================================================================

    pub static ref RENDER_LATENCY: Histogram = register_histogram!(
        format!("{}_render_latency_seconds", METRIC_PREFIX),
        "Template resolution and rendering latency",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]
    ).unwrap();

    pub static ref TEMPLATES_MISSING_TOTAL: IntCounter = register_int_counter!(
        format!("{}_templates_missing_total", METRIC_PREFIX),
        "Requests referencing an unknown template"
    ).unwrap();

    // ============================================================================
    // Queue Metrics
    // ============================================================================

    pub static ref QUEUE_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_published_total", METRIC_PREFIX),
        "Total requests published to the queue"
    ).unwrap();

    pub static ref QUEUE_CONSUMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_consumed_total", METRIC_PREFIX),
        "Total payloads taken from the queue by consumers"
    ).unwrap();

    pub static ref QUEUE_DEPTH: IntGauge = register_int_gauge!(
        format!("{}_queue_depth", METRIC_PREFIX),
        "Payloads waiting in the queue"
    ).unwrap();

    // ============================================================================
    // Redis Metrics
    // ============================================================================

    /// 1 = connected, 0 = disconnected
    pub static ref REDIS_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_redis_connection_status", METRIC_PREFIX),
        "Redis connection status (1 = connected, 0 = disconnected)"
    ).unwrap();

    // ============================================================================
    // HTTP Metrics
    // ============================================================================

    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_http_requests_total", METRIC_PREFIX),
        "Total ops HTTP requests",
        &["method", "path", "status"]
    ).unwrap();
}

/// Encode all registered metrics in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}
