//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use notify_dispatch::channels::{Sender, SenderFactory};
use notify_dispatch::config::RegistryConfig;
use notify_dispatch::error::{DispatchError, Result};
use notify_dispatch::notification::{
    DispatcherBuilder, NotificationDispatcher, RenderedContent, SendRequest, SenderConfiguration,
    StaticChannelConfigs,
};
use notify_dispatch::registry::{Discoverable, SenderRegistry};
use notify_dispatch::retry::{BackoffConfig, RetryPolicy};

pub const RECORDING_CHANNEL: &str = "recording";

/// Sender that counts calls and fails transiently for the first
/// `transient_failures` of them.
pub struct RecordingSender {
    pub calls: Arc<AtomicU32>,
    pub transient_failures: u32,
}

#[async_trait]
impl Sender for RecordingSender {
    fn channel_type(&self) -> &str {
        RECORDING_CHANNEL
    }

    async fn configure(&self, _config: &SenderConfiguration) -> Result<()> {
        Ok(())
    }

    async fn send(&self, _request: &SendRequest, content: &RenderedContent) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.transient_failures {
            return Err(DispatchError::TransientProvider(format!("timeout #{}", call)));
        }
        Ok(format!("rec-{}:{}", call, content.body))
    }
}

pub struct RecordingFactory {
    pub calls: Arc<AtomicU32>,
    pub transient_failures: u32,
}

impl Discoverable for RecordingFactory {
    fn kind(&self) -> &str {
        RECORDING_CHANNEL
    }
}

impl SenderFactory for RecordingFactory {
    fn create(&self) -> Result<Arc<dyn Sender>> {
        Ok(Arc::new(RecordingSender {
            calls: Arc::clone(&self.calls),
            transient_failures: self.transient_failures,
        }))
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        backoff: BackoffConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
    }
}

/// Registry with the built-in channels plus the recording channel.
pub fn recording_registry(transient_failures: u32) -> (Arc<SenderRegistry>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let registry = Arc::new(SenderRegistry::with_builtins(RegistryConfig::default()));
    registry.discover_channels(vec![Arc::new(RecordingFactory {
        calls: Arc::clone(&calls),
        transient_failures,
    }) as Arc<dyn SenderFactory>]);
    (registry, calls)
}

pub fn builder(transient_failures: u32) -> (DispatcherBuilder, Arc<AtomicU32>) {
    let (registry, calls) = recording_registry(transient_failures);
    let builder = NotificationDispatcher::builder(registry, Arc::new(StaticChannelConfigs::new()))
        .retry_policy(fast_retry(3));
    (builder, calls)
}

pub fn calls(counter: &AtomicU32) -> u32 {
    counter.load(Ordering::SeqCst)
}
