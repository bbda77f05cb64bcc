//! Fixed-window rate limiting.
//!
//! Counters are per `(tenant, target)` with an optional global counter. The
//! window is not tracked per key: `reset()` clears every counter at once and
//! is driven on a wall-clock interval by `WindowResetTask`, so bursts across a
//! window boundary are accepted.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::notification::SendRequest;

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Whether the request fits in the current window. Does not consume.
    async fn allow(&self, request: &SendRequest) -> Result<bool>;

    /// Count a request against the current window.
    async fn record(&self, request: &SendRequest) -> Result<()>;

    /// Start a new window.
    async fn reset(&self) {}

    /// Window length, if the limiter needs periodic resets
    fn window(&self) -> Option<Duration> {
        None
    }
}

/// Snapshot of limiter state
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub tracked_targets: usize,
    pub global_count: u32,
    pub rejected_total: u64,
    pub windows_completed: u64,
}

/// In-memory fixed-window limiter
pub struct FixedWindowRateLimiter {
    config: RateLimitConfig,
    counters: DashMap<String, AtomicU32>,
    global: AtomicU32,
    rejected: AtomicU64,
    windows: AtomicU64,
}

impl FixedWindowRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            counters: DashMap::new(),
            global: AtomicU32::new(0),
            rejected: AtomicU64::new(0),
            windows: AtomicU64::new(0),
        }
    }

    fn key(request: &SendRequest) -> String {
        format!("{}:{}", request.tenant_id(), request.target().trim())
    }

    /// Sends counted for this request's target in the current window
    pub fn count_for(&self, request: &SendRequest) -> u32 {
        self.counters
            .get(&Self::key(request))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            enabled: self.config.enabled,
            tracked_targets: self.counters.len(),
            global_count: self.global.load(Ordering::Relaxed),
            rejected_total: self.rejected.load(Ordering::Relaxed),
            windows_completed: self.windows.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn allow(&self, request: &SendRequest) -> Result<bool> {
        if !self.config.enabled {
            return Ok(true);
        }

        if let Some(global_max) = self.config.global_max {
            if self.global.load(Ordering::Relaxed) >= global_max {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Ok(false);
            }
        }

        let allowed = self.count_for(request) < self.config.max_per_target;
        if !allowed {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        Ok(allowed)
    }

    async fn record(&self, request: &SendRequest) -> Result<()> {
        if !self.config.enabled {
            return Ok(());
        }

        self.counters
            .entry(Self::key(request))
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::Relaxed);
        self.global.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn reset(&self) {
        let tracked = self.counters.len();
        self.counters.clear();
        self.global.store(0, Ordering::Relaxed);
        self.windows.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(tracked, "Rate limit window reset");
    }

    fn window(&self) -> Option<Duration> {
        (self.config.enabled && self.config.window_seconds > 0)
            .then(|| Duration::from_secs(self.config.window_seconds))
    }
}
