//! Worker pool draining the queue into the dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::QueueBackend;
use crate::notification::{NotificationDispatcher, SendRequest};

/// Pause after a backend error so a dead connection is not hammered
const BACKEND_ERROR_BACKOFF_MS: u64 = 1000;

#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub received: AtomicU64,
    pub dispatched: AtomicU64,
    pub failed: AtomicU64,
    pub malformed: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsumerStatsSnapshot {
    pub received: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub malformed: u64,
}

impl ConsumerStats {
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

/// Pops queued requests and runs them through the dispatcher.
///
/// Every failure is logged and the message dropped; nothing is requeued.
pub struct NotificationConsumer {
    backend: Arc<dyn QueueBackend>,
    dispatcher: Arc<NotificationDispatcher>,
    workers: usize,
    poll_timeout: Duration,
    stats: ConsumerStats,
}

impl NotificationConsumer {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        dispatcher: Arc<NotificationDispatcher>,
        workers: usize,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            workers: workers.max(1),
            poll_timeout,
            stats: ConsumerStats::default(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn stats(&self) -> ConsumerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Spawn the workers. Each stops when `shutdown` fires.
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        tracing::info!(
            workers = self.workers,
            backend = self.backend.backend_name(),
            "Starting notification consumer"
        );

        (0..self.workers)
            .map(|worker| {
                let consumer = Arc::clone(self);
                let shutdown = shutdown.subscribe();
                tokio::spawn(async move { consumer.run_worker(worker, shutdown).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, mut shutdown: broadcast::Receiver<()>) {
        tracing::debug!(worker, "Consumer worker started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    break;
                }
                popped = self.backend.pop(self.poll_timeout) => {
                    match popped {
                        Ok(Some(payload)) => self.handle(worker, &payload).await,
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(worker, error = %e, "Queue pop failed");
                            tokio::time::sleep(Duration::from_millis(BACKEND_ERROR_BACKOFF_MS)).await;
                        }
                    }
                }
            }
        }

        tracing::debug!(worker, "Consumer worker stopped");
    }

    /// Decode and dispatch one payload.
    pub async fn handle(&self, worker: usize, payload: &str) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);
        crate::metrics::QUEUE_CONSUMED_TOTAL.inc();

        let request: SendRequest = match serde_json::from_str(payload) {
            Ok(request) => request,
            Err(e) => {
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(worker, error = %e, "Dropping malformed queue payload");
                return;
            }
        };

        match self.dispatcher.dispatch(&request).await {
            Ok(receipt) => {
                self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    worker,
                    request_id = %receipt.request_id,
                    provider_message_id = %receipt.provider_message_id,
                    "Queued notification dispatched"
                );
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    worker,
                    request_id = %request.request_id(),
                    channel = %request.channel_type(),
                    code = e.root().code(),
                    error = %e,
                    "Dropping queued notification after dispatch failure"
                );
            }
        }
    }
}
