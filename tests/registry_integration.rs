//! Sender resolution and caching through the public registry API.

mod common;

use std::sync::Arc;

use notify_dispatch::channels::{Sender, SenderFactory};
use notify_dispatch::config::{RegistryConfig, Settings};
use notify_dispatch::error::DispatchError;
use notify_dispatch::notification::{
    NotificationDispatcher, SendRequest, SenderConfiguration, StaticChannelConfigs,
};
use notify_dispatch::registry::SenderRegistry;

use common::{calls, fast_retry, recording_registry, RecordingFactory, RECORDING_CHANNEL};

fn aliyun(key_id: &str) -> SenderConfiguration {
    SenderConfiguration::new()
        .with("provider", "aliyun")
        .with("accessKeyId", key_id)
        .with("accessKeySecret", "secret")
        .with("signName", "Acme")
        .with("templateCode", "SMS_100")
}

#[tokio::test]
async fn test_same_configuration_resolves_to_cached_instance() {
    let registry = SenderRegistry::with_builtins(RegistryConfig::default());
    let cfg_a = aliyun("AK-A");

    let first = registry.resolve("sms", &cfg_a).await.unwrap();
    let second = registry.resolve("sms", &cfg_a).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    let stats = registry.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
}

#[tokio::test]
async fn test_distinct_configuration_gets_distinct_instance() {
    let registry = SenderRegistry::with_builtins(RegistryConfig::default());
    let cfg_a = aliyun("AK-A");
    let cfg_b = aliyun("AK-B");

    let a = registry.resolve("sms", &cfg_a).await.unwrap();
    let b = registry.resolve("sms", &cfg_b).await.unwrap();
    let a_again = registry.resolve("sms", &cfg_a).await.unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&a, &a_again));
    assert_eq!(registry.cached_instances(), 2);
}

#[tokio::test]
async fn test_channel_lookup_is_case_insensitive() {
    let registry = SenderRegistry::with_builtins(RegistryConfig::default());
    let cfg = SenderConfiguration::new();

    let lower = registry.resolve("console", &cfg).await.unwrap();
    let upper = registry.resolve(" Console ", &cfg).await.unwrap();
    assert!(Arc::ptr_eq(&lower, &upper));
}

#[tokio::test]
async fn test_missing_provider_keys_fail_and_are_not_cached_as_configured() {
    let registry = SenderRegistry::with_builtins(RegistryConfig::default());
    let incomplete = SenderConfiguration::new().with("provider", "tencent");

    let err = registry.resolve("sms", &incomplete).await.err().unwrap();
    assert!(matches!(err, DispatchError::Configuration(_)));

    // Still failing on the next call: configure runs again rather than
    // handing out a half-configured sender
    assert!(registry.resolve("sms", &incomplete).await.is_err());
    assert_eq!(registry.stats().configure_failures, 2);
}

#[tokio::test]
async fn test_unknown_sms_provider_is_rejected() {
    let registry = SenderRegistry::with_builtins(RegistryConfig::default());
    let cfg = SenderConfiguration::new().with("provider", "carrier-pigeon");

    assert!(registry.resolve("sms", &cfg).await.is_err());
}

#[tokio::test]
async fn test_tenant_configuration_selects_separate_sender() {
    let (registry, counter) = recording_registry(0);

    let mut settings = Settings::default();
    settings.channels.insert(
        RECORDING_CHANNEL.to_string(),
        [("region".to_string(), "global".to_string())].into_iter().collect(),
    );
    let mut acme = std::collections::HashMap::new();
    acme.insert(
        RECORDING_CHANNEL.to_string(),
        [("region".to_string(), "eu".to_string())].into_iter().collect(),
    );
    settings.tenants.insert("acme".to_string(), acme);

    let dispatcher = NotificationDispatcher::builder(
        Arc::clone(&registry),
        Arc::new(StaticChannelConfigs::from_settings(&settings)),
    )
    .retry_policy(fast_retry(1))
    .build();

    let global = SendRequest::builder("g1", RECORDING_CHANNEL, "+111").content("x").build();
    let tenant = SendRequest::builder("t1", RECORDING_CHANNEL, "+111")
        .tenant("acme")
        .content("x")
        .build();

    dispatcher.dispatch(&global).await.unwrap();
    dispatcher.dispatch(&tenant).await.unwrap();

    assert_eq!(registry.cached_instances(), 2);
    assert_eq!(calls(&counter), 2);
}

#[tokio::test]
async fn test_register_replaces_factory_and_drops_cached_senders() {
    let (registry, old_calls) = recording_registry(0);
    let cfg = SenderConfiguration::new();

    registry.resolve(RECORDING_CHANNEL, &cfg).await.unwrap();
    assert_eq!(registry.cached_instances(), 1);

    let new_calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
    registry
        .register(
            RECORDING_CHANNEL,
            Arc::new(RecordingFactory {
                calls: Arc::clone(&new_calls),
                transient_failures: 0,
            }) as Arc<dyn SenderFactory>,
        )
        .await
        .unwrap();
    assert_eq!(registry.cached_instances(), 0);

    let sender = registry.resolve(RECORDING_CHANNEL, &cfg).await.unwrap();
    let request = SendRequest::builder("x", RECORDING_CHANNEL, "+1").content("hi").build();
    sender
        .send(&request, &notify_dispatch::notification::RenderedContent::new("hi"))
        .await
        .unwrap();

    assert_eq!(calls(&old_calls), 0);
    assert_eq!(calls(&new_calls), 1);
}

#[tokio::test]
async fn test_destroy_empties_registry() {
    let registry = SenderRegistry::with_builtins(RegistryConfig::default());
    registry
        .resolve("console", &SenderConfiguration::new())
        .await
        .unwrap();

    registry.destroy().await;
    registry.destroy().await;

    assert_eq!(registry.cached_instances(), 0);
    assert!(!registry.supports("console"));
    assert!(matches!(
        registry.resolve("console", &SenderConfiguration::new()).await.err(),
        Some(DispatchError::ChannelNotSupported(_))
    ));
}
