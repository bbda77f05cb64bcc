use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::ratelimit::RateLimiter;

/// Starts a new rate-limit window on a fixed interval.
pub struct WindowResetTask {
    limiter: Arc<dyn RateLimiter>,
    window: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl WindowResetTask {
    /// Returns `None` when the limiter does not use periodic windows.
    pub fn new(limiter: Arc<dyn RateLimiter>, shutdown: broadcast::Receiver<()>) -> Option<Self> {
        let window = limiter.window()?;
        if window.is_zero() {
            return None;
        }
        Some(Self {
            limiter,
            window,
            shutdown,
        })
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.window);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(window_secs = self.window.as_secs(), "Rate limit window task started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Rate limit window task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.limiter.reset().await;
                    tracing::trace!("Rate limit window reset");
                }
            }
        }

        tracing::info!("Rate limit window task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::notification::SendRequest;
    use crate::ratelimit::FixedWindowRateLimiter;

    #[tokio::test]
    async fn test_window_reset_clears_counters() {
        let limiter = Arc::new(FixedWindowRateLimiter::new(RateLimitConfig {
            enabled: true,
            max_per_target: 1,
            global_max: None,
            window_seconds: 1,
        }));
        let request = SendRequest::builder("r", "console", "ops").content("x").build();
        limiter.record(&request).await.unwrap();
        assert!(!limiter.allow(&request).await.unwrap());

        let (tx, rx) = broadcast::channel(1);
        let task = WindowResetTask::new(limiter.clone(), rx).unwrap();
        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(limiter.allow(&request).await.unwrap());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_disabled_window_yields_no_task() {
        let limiter = Arc::new(FixedWindowRateLimiter::new(RateLimitConfig {
            window_seconds: 0,
            ..Default::default()
        }));
        let (_tx, rx) = broadcast::channel(1);
        assert!(WindowResetTask::new(limiter, rx).is_none());
    }
}
