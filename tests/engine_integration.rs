//! The assembled engine: synchronous and queued paths, background tasks,
//! and shutdown.

use std::sync::Arc;
use std::time::Duration;

use notify_dispatch::config::Settings;
use notify_dispatch::engine::NotifyEngine;
use notify_dispatch::error::DispatchError;
use notify_dispatch::notification::{NoticeStatus, NoticeStore, SendRequest, DEFAULT_TENANT};
use notify_dispatch::template::Template;

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.queue.workers = 2;
    settings.queue.poll_timeout_ms = 20;
    settings.blacklist.targets = vec!["blocked@example.com".to_string()];
    settings
}

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_published_requests_are_dispatched_by_workers() {
    let engine = Arc::new(NotifyEngine::build(settings()).await.unwrap());
    engine.start().await;

    for i in 0..5 {
        let request = SendRequest::builder(format!("q-{}", i), "console", "ops")
            .content("queued {0}")
            .variables(notify_dispatch::notification::TemplateArgs::positional([i.to_string()]))
            .build();
        engine.publish(&request).await.unwrap();
    }

    let consumer = Arc::clone(&engine.transport().unwrap().consumer);
    assert!(wait_for(|| consumer.stats().dispatched == 5).await);

    let notice = engine
        .notices()
        .find_by_request(DEFAULT_TENANT, "q-3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.status, NoticeStatus::Sent);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_queued_failures_are_dropped_not_surfaced() {
    let engine = Arc::new(NotifyEngine::build(settings()).await.unwrap());
    engine.start().await;

    // Publishing succeeds even though delivery will be rejected
    let blocked = SendRequest::builder("q-b", "email", "blocked@example.com")
        .content("hi")
        .build();
    engine.publish(&blocked).await.unwrap();

    let consumer = Arc::clone(&engine.transport().unwrap().consumer);
    assert!(wait_for(|| consumer.stats().failed == 1).await);
    assert_eq!(engine.dispatcher().stats().blocked, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_sync_send_uses_configured_templates_and_blacklist() {
    let engine = NotifyEngine::build(settings()).await.unwrap();
    engine
        .templates()
        .create(Template::new("otp", "One-time code", "Your code is {code}"))
        .unwrap();

    let request = SendRequest::builder("s-1", "console", "ops")
        .template("otp")
        .variables(
            notify_dispatch::notification::TemplateArgs::named(serde_json::json!({"code": "4711"}))
                .unwrap(),
        )
        .build();
    let receipt = engine.send(&request).await.unwrap();
    assert_eq!(receipt.attempts, 1);

    // Repeat returns the recorded receipt
    let again = engine.send(&request).await.unwrap();
    assert_eq!(again.provider_message_id, receipt.provider_message_id);

    let blocked = SendRequest::builder("s-2", "email", "Blocked@Example.com")
        .content("hi")
        .build();
    assert!(matches!(
        engine.send(&blocked).await,
        Err(DispatchError::Blacklisted(_))
    ));
}

#[tokio::test]
async fn test_shutdown_stops_workers_and_releases_senders() {
    let engine = NotifyEngine::build(settings()).await.unwrap();
    engine.start().await;

    let request = SendRequest::builder("d-1", "console", "ops").content("x").build();
    engine.send(&request).await.unwrap();
    assert_eq!(engine.registry().cached_instances(), 1);

    tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
        .await
        .expect("shutdown completes");

    assert_eq!(engine.registry().cached_instances(), 0);
}
