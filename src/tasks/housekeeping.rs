use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::idempotency::IdempotencyStore;
use crate::registry::SenderRegistry;

/// Periodic cleanup of expired idempotency records and idle sender instances.
pub struct HousekeepingTask {
    idempotency: Arc<dyn IdempotencyStore>,
    registry: Arc<SenderRegistry>,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl HousekeepingTask {
    pub fn new(
        idempotency: Arc<dyn IdempotencyStore>,
        registry: Arc<SenderRegistry>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            idempotency,
            registry,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.tick().await;

        tracing::info!(interval_secs = self.interval.as_secs(), "Housekeeping task started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Housekeeping task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.run_once().await;
                }
            }
        }

        tracing::info!("Housekeeping task stopped");
    }

    /// One cleanup pass. Returns `(expired records, evicted senders)`.
    pub async fn run_once(&self) -> (usize, usize) {
        let expired = self.idempotency.cleanup_expired().await;
        let evicted = self.registry.evict_idle().await;

        if expired > 0 || evicted > 0 {
            tracing::debug!(
                expired_records = expired,
                evicted_senders = evicted,
                backend = self.idempotency.backend_name(),
                "Housekeeping pass completed"
            );
        }

        (expired, evicted)
    }
}
