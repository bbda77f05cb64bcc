//! Exponential backoff with jitter

use std::time::Duration;

use rand::Rng;

use crate::config::DispatchConfig;

/// Exponential backoff configuration
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential growth
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 200,
            max_delay_ms: 5_000,
            multiplier: 2.0,
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

impl From<&DispatchConfig> for BackoffConfig {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            initial_delay_ms: config.initial_backoff_ms,
            max_delay_ms: config.max_backoff_ms,
            multiplier: config.multiplier,
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }
}

/// Exponential backoff calculator with jitter.
///
/// The n-th delay is `initial * multiplier^n`, capped at `max_delay_ms`.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Get the next delay duration
    pub fn next_delay(&mut self) -> Duration {
        let exponent = self.attempt.min(32) as i32;
        self.attempt += 1;

        let base_delay = self.config.initial_delay_ms as f64 * self.config.multiplier.powi(exponent);
        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        let final_delay = if self.config.jitter_factor > 0.0 && capped_delay > 0.0 {
            let jitter_range = capped_delay * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
            (capped_delay + jitter).max(0.0)
        } else {
            capped_delay.max(0.0)
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Reset the backoff to initial state
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
