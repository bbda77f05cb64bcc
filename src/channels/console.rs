//! Console channel: writes messages to the log instead of a vendor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Sender, SenderFactory};
use crate::error::{DispatchError, Result};
use crate::notification::{RenderedContent, SendRequest, SenderConfiguration};
use crate::registry::Discoverable;

pub const CONSOLE_CHANNEL: &str = "console";

#[derive(Debug, Default)]
pub struct ConsoleSender {
    /// Optional line prefix from the `prefix` key
    prefix: OnceLock<String>,
    delivered: AtomicU64,
}

impl ConsoleSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages written so far
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sender for ConsoleSender {
    fn channel_type(&self) -> &str {
        CONSOLE_CHANNEL
    }

    async fn configure(&self, config: &SenderConfiguration) -> Result<()> {
        let prefix = config.get("prefix").unwrap_or_default().to_string();
        self.prefix
            .set(prefix)
            .map_err(|_| DispatchError::Configuration("console sender already configured".into()))

    }

    async fn send(&self, request: &SendRequest, content: &RenderedContent) -> Result<String> {
        let message_id = Uuid::new_v4().to_string();
        let prefix = self.prefix.get().map(String::as_str).unwrap_or_default();

        tracing::info!(
            channel = CONSOLE_CHANNEL,
            request_id = %request.request_id(),
            tenant_id = %request.tenant_id(),
            recipient = %request.target(),
            message_id = %message_id,
            "{}{}",
            prefix,
            content.body
        );

        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(message_id)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSenderFactory;

impl Discoverable for ConsoleSenderFactory {
    fn kind(&self) -> &str {
        CONSOLE_CHANNEL
    }
}

impl SenderFactory for ConsoleSenderFactory {
    fn create(&self) -> Result<Arc<dyn Sender>> {
        Ok(Arc::new(ConsoleSender::new()))
    }
}
