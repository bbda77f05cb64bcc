//! In-process queue backend. Payloads are lost on restart.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::QueueBackend;
use crate::error::Result;

#[derive(Debug, Default)]
pub struct MemoryQueueBackend {
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl MemoryQueueBackend {
    pub fn new() -> Self {
        Self::default()
    }

    async fn try_pop(&self) -> Option<String> {
        self.items.lock().await.pop_front()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueueBackend {
    async fn push(&self, payload: String) -> Result<()> {
        self.items.lock().await.push_back(payload);
        self.notify.notify_one();
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking so a push in between is not missed
            let notified = self.notify.notified();

            if let Some(payload) = self.try_pop().await {
                return Ok(Some(payload));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.try_pop().await);
            }
        }
    }

    async fn len(&self) -> Option<usize> {
        Some(self.items.lock().await.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueueBackend::new();
        queue.push("a".into()).await.unwrap();
        queue.push("b".into()).await.unwrap();

        assert_eq!(queue.len().await, Some(2));
        assert_eq!(queue.pop(Duration::from_millis(10)).await.unwrap().as_deref(), Some("a"));
        assert_eq!(queue.pop(Duration::from_millis(10)).await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue = MemoryQueueBackend::new();
        let popped = queue.pop(Duration::from_millis(20)).await.unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(MemoryQueueBackend::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push("late".into()).await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped.as_deref(), Some("late"));
    }
}
