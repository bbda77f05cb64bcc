use std::sync::Arc;

use super::QueueBackend;
use crate::error::Result;
use crate::notification::SendRequest;

/// Publishes requests for asynchronous dispatch.
#[derive(Clone)]
pub struct NotificationProducer {
    backend: Arc<dyn QueueBackend>,
    queue_name: String,
}

impl NotificationProducer {
    pub fn new(backend: Arc<dyn QueueBackend>, queue_name: impl Into<String>) -> Self {
        Self {
            backend,
            queue_name: queue_name.into(),
        }
    }

    /// Serialize the request and enqueue it. Returns once the backend has
    /// accepted the payload; delivery happens on a consumer worker.
    #[tracing::instrument(skip(self, request), fields(request_id = %request.request_id(), queue = %self.queue_name))]
    pub async fn publish(&self, request: &SendRequest) -> Result<()> {
        let payload = serde_json::to_string(request)?;
        self.backend.push(payload).await?;

        crate::metrics::QUEUE_PUBLISHED_TOTAL.inc();
        tracing::debug!(channel = %request.channel_type(), "Notification published");
        Ok(())
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueueBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_pushes_json() {
        let backend = Arc::new(MemoryQueueBackend::new());
        let producer = NotificationProducer::new(backend.clone(), "default");

        let request = SendRequest::builder("r-1", "console", "ops")
            .content("hello")
            .build();
        producer.publish(&request).await.unwrap();

        let payload = backend.pop(Duration::from_millis(10)).await.unwrap().unwrap();
        let decoded: SendRequest = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded, request);
    }
}
