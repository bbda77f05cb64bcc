//! Extension hooks around the dispatch pipeline.

use std::time::Duration;

use async_trait::async_trait;

use super::{SendReceipt, SendRequest};
use crate::error::DispatchError;

/// Hooks run by the dispatcher around the provider call.
///
/// Interceptors run in registration order. They observe the pipeline; they
/// cannot veto a send or change its outcome.
#[async_trait]
pub trait DispatchInterceptor: Send + Sync {
    /// After rendering, before the sender is resolved
    async fn before_send(&self, _request: &SendRequest) {}

    async fn after_send(&self, _request: &SendRequest, _receipt: &SendReceipt) {}

    /// On a non-retryable failure or once retries are exhausted
    async fn on_error(&self, _request: &SendRequest, _error: &DispatchError) {}
}

/// Why a request left the pipeline before dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortCircuit {
    Duplicate,
    Blacklisted,
    RateLimited,
}

impl ShortCircuit {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShortCircuit::Duplicate => "duplicate",
            ShortCircuit::Blacklisted => "blacklisted",
            ShortCircuit::RateLimited => "rate_limited",
        }
    }
}

/// Timing and outcome hooks for a metrics collaborator.
pub trait DispatchInstrumentation: Send + Sync {
    fn on_short_circuit(&self, _request: &SendRequest, _reason: ShortCircuit) {}

    /// Render step finished (`ok == false` when the template was not found)
    fn on_render(&self, _request: &SendRequest, _elapsed: Duration, _ok: bool) {}

    /// Dispatch step finished, including every retry
    fn on_dispatch(
        &self,
        _request: &SendRequest,
        _elapsed: Duration,
        _outcome: Result<&SendReceipt, &DispatchError>,
    ) {
    }
}

/// Instrumentation that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInstrumentation;

impl DispatchInstrumentation for NoopInstrumentation {}

/// Interceptor that logs every hook at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInterceptor;

#[async_trait]
impl DispatchInterceptor for LoggingInterceptor {
    async fn before_send(&self, request: &SendRequest) {
        tracing::debug!(
            request_id = %request.request_id(),
            channel = %request.channel_type(),
            recipient = %request.target(),
            "Sending notification"
        );
    }

    async fn after_send(&self, request: &SendRequest, receipt: &SendReceipt) {
        tracing::debug!(
            request_id = %request.request_id(),
            provider_message_id = %receipt.provider_message_id,
            attempts = receipt.attempts,
            "Notification sent"
        );
    }

    async fn on_error(&self, request: &SendRequest, error: &DispatchError) {
        tracing::debug!(
            request_id = %request.request_id(),
            code = error.root().code(),
            error = %error,
            "Notification failed"
        );
    }
}
