//! Composition root: builds every collaborator from `Settings` and owns the
//! background tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::blacklist::MemoryBlacklist;
use crate::config::Settings;
use crate::error::{AppError, DispatchError, Result};
use crate::idempotency::{create_idempotency_store, IdempotencyStore};
use crate::metrics::PrometheusInstrumentation;
use crate::notification::{
    DispatcherBuilder, LoggingInterceptor, MemoryNoticeStore, NoticeRecorder,
    NotificationDispatcher, SendReceipt, SendRequest, StaticChannelConfigs,
};
use crate::queue::{create_queue_backend, NotificationConsumer, NotificationProducer, QueueBackend};
use crate::ratelimit::FixedWindowRateLimiter;
use crate::redis::{PoolError, RedisPool};
use crate::registry::SenderRegistry;
use crate::retry::RetryPolicy;
use crate::tasks::{HousekeepingTask, WindowResetTask};
use crate::template::TemplateStore;

const HOUSEKEEPING_INTERVAL_SECS: u64 = 60;

/// How long shutdown waits for workers to finish their current message
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Queue side of the engine, present when `queue.enabled`
pub struct QueueTransport {
    pub backend: Arc<dyn QueueBackend>,
    pub producer: NotificationProducer,
    pub consumer: Arc<NotificationConsumer>,
}

/// The assembled dispatch engine.
pub struct NotifyEngine {
    settings: Arc<Settings>,
    registry: Arc<SenderRegistry>,
    templates: Arc<TemplateStore>,
    notices: Arc<MemoryNoticeStore>,
    blacklist: Arc<MemoryBlacklist>,
    rate_limiter: Arc<FixedWindowRateLimiter>,
    idempotency: Arc<dyn IdempotencyStore>,
    dispatcher: Arc<NotificationDispatcher>,
    redis: Option<Arc<RedisPool>>,
    transport: Option<QueueTransport>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    started_at: Instant,
}

impl NotifyEngine {
    /// Build the engine. Redis-backed stores fall back to memory when Redis
    /// cannot be reached; only an unparsable Redis URL is an error.
    pub async fn build(settings: Settings) -> std::result::Result<Self, AppError> {
        let redis = connect_redis(&settings).await?;

        let registry = Arc::new(SenderRegistry::with_builtins(settings.registry.clone()));
        let templates = Arc::new(TemplateStore::new());
        let notices = Arc::new(MemoryNoticeStore::new());
        let blacklist = Arc::new(MemoryBlacklist::from_config(&settings.blacklist));
        let rate_limiter = Arc::new(FixedWindowRateLimiter::new(settings.rate_limit.clone()));
        let idempotency = create_idempotency_store(&settings.idempotency, redis.clone());
        let configs = Arc::new(StaticChannelConfigs::from_settings(&settings));

        let dispatcher = Arc::new(
            DispatcherBuilder::new(Arc::clone(&registry), configs)
                .templates(templates.clone())
                .idempotency(Arc::clone(&idempotency))
                .blacklist(blacklist.clone())
                .rate_limiter(rate_limiter.clone())
                .interceptor(Arc::new(NoticeRecorder::new(notices.clone())))
                .interceptor(Arc::new(LoggingInterceptor))
                .instrumentation(Arc::new(PrometheusInstrumentation))
                .retry_policy(RetryPolicy::from_config(&settings.dispatch))
                .build(),
        );

        let transport = settings.queue.enabled.then(|| {
            let backend = create_queue_backend(&settings.queue, redis.clone());
            let producer = NotificationProducer::new(Arc::clone(&backend), settings.queue.name.clone());
            let consumer = Arc::new(NotificationConsumer::new(
                Arc::clone(&backend),
                Arc::clone(&dispatcher),
                settings.queue.workers,
                Duration::from_millis(settings.queue.poll_timeout_ms),
            ));
            QueueTransport {
                backend,
                producer,
                consumer,
            }
        });

        let (shutdown_tx, _) = broadcast::channel(1);

        tracing::info!(
            channels = ?registry.channel_types(),
            idempotency = idempotency.backend_name(),
            queue = transport.as_ref().map(|t| t.backend.backend_name()).unwrap_or("disabled"),
            "Notification engine assembled"
        );

        Ok(Self {
            settings: Arc::new(settings),
            registry,
            templates,
            notices,
            blacklist,
            rate_limiter,
            idempotency,
            dispatcher,
            redis,
            transport,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    /// Spawn the consumer workers and background tasks.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return;
        }

        if let Some(transport) = &self.transport {
            tasks.extend(transport.consumer.start(&self.shutdown_tx));
        }

        if let Some(task) =
            WindowResetTask::new(self.rate_limiter.clone(), self.shutdown_tx.subscribe())
        {
            tasks.push(tokio::spawn(task.run()));
        }

        let housekeeping = HousekeepingTask::new(
            Arc::clone(&self.idempotency),
            Arc::clone(&self.registry),
            Duration::from_secs(HOUSEKEEPING_INTERVAL_SECS),
            self.shutdown_tx.subscribe(),
        );
        tasks.push(tokio::spawn(housekeeping.run()));

        tracing::info!(tasks = tasks.len(), "Background tasks started");
    }

    /// Synchronous path: run the pipeline and return the outcome.
    pub async fn send(&self, request: &SendRequest) -> Result<SendReceipt> {
        self.dispatcher.dispatch(request).await
    }

    /// Asynchronous path: enqueue for a consumer worker.
    pub async fn publish(&self, request: &SendRequest) -> Result<()> {
        match &self.transport {
            Some(transport) => transport.producer.publish(request).await,
            None => Err(DispatchError::Queue("queue transport is disabled".to_string())),
        }
    }

    /// Stop background work and release every cached sender. Idempotent.
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Shutting down notification engine");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        if tokio::time::timeout(DRAIN_TIMEOUT, join_all(handles)).await.is_err() {
            tracing::warn!(
                timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "Background tasks did not stop in time"
            );
        }

        self.registry.destroy().await;
        tracing::info!("Notification engine stopped");
    }

    /// Sender for the shutdown broadcast, for callers that need to stop
    /// alongside the engine
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<SenderRegistry> {
        &self.registry
    }

    pub fn templates(&self) -> &Arc<TemplateStore> {
        &self.templates
    }

    pub fn notices(&self) -> &Arc<MemoryNoticeStore> {
        &self.notices
    }

    pub fn blacklist(&self) -> &Arc<MemoryBlacklist> {
        &self.blacklist
    }

    pub fn rate_limiter(&self) -> &Arc<FixedWindowRateLimiter> {
        &self.rate_limiter
    }

    pub fn idempotency(&self) -> &Arc<dyn IdempotencyStore> {
        &self.idempotency
    }

    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    pub fn redis(&self) -> Option<&Arc<RedisPool>> {
        self.redis.as_ref()
    }

    pub fn transport(&self) -> Option<&QueueTransport> {
        self.transport.as_ref()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

fn needs_redis(settings: &Settings) -> bool {
    settings.idempotency.backend == "redis"
        || (settings.queue.enabled && settings.queue.backend == "redis")
}

async fn connect_redis(settings: &Settings) -> std::result::Result<Option<Arc<RedisPool>>, AppError> {
    if !needs_redis(settings) {
        return Ok(None);
    }

    let pool = match RedisPool::new(settings.redis.clone()) {
        Ok(pool) => Arc::new(pool),
        Err(PoolError::Redis(e)) => return Err(AppError::Redis(e)),
        Err(e) => return Err(AppError::Internal(e.to_string())),
    };

    match pool.ping().await {
        Ok(()) => Ok(Some(pool)),
        Err(e) => {
            tracing::warn!(
                url = %pool.url(),
                error = %e,
                "Redis unavailable, Redis-backed stores fall back to memory"
            );
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_engine_sends_and_shuts_down() {
        let engine = NotifyEngine::build(Settings::default()).await.unwrap();
        engine.start().await;

        let request = SendRequest::builder("e-1", "console", "ops")
            .content("hello")
            .build();
        let receipt = engine.send(&request).await.unwrap();
        assert_eq!(receipt.attempts, 1);
        assert_eq!(engine.notices().len(), 1);

        engine.shutdown().await;
        engine.shutdown().await;
        assert_eq!(engine.registry().cached_instances(), 0);
    }

    #[tokio::test]
    async fn test_publish_without_queue_is_rejected() {
        let mut settings = Settings::default();
        settings.queue.enabled = false;
        let engine = NotifyEngine::build(settings).await.unwrap();

        let request = SendRequest::builder("e-2", "console", "ops").content("x").build();
        assert!(matches!(
            engine.publish(&request).await,
            Err(DispatchError::Queue(_))
        ));
    }

    #[test]
    fn test_redis_needed_only_for_redis_backends() {
        let mut settings = Settings::default();
        assert!(!needs_redis(&settings));

        settings.queue.backend = "redis".to_string();
        assert!(needs_redis(&settings));

        settings.queue.enabled = false;
        assert!(!needs_redis(&settings));
    }
}
