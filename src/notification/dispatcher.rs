use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;

use super::{
    ChannelConfigSource, DispatchInstrumentation, DispatchInterceptor, MessageContent,
    NoopInstrumentation, RenderedContent, SendReceipt, SendRequest, ShortCircuit,
};
use crate::blacklist::{BlacklistChecker, MemoryBlacklist};
use crate::error::{DispatchError, Result};
use crate::idempotency::{IdempotencyStore, MemoryIdempotencyStore};
use crate::ratelimit::{FixedWindowRateLimiter, RateLimiter};
use crate::registry::SenderRegistry;
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::template::{Locale, TemplateError, TemplateRenderer, TemplateSource, TemplateStore};

/// Statistics for the notification dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Requests entering the pipeline
    pub requests: AtomicU64,
    /// Requests delivered by a provider
    pub sent: AtomicU64,
    /// Requests answered from the idempotency store
    pub duplicates: AtomicU64,
    /// Requests rejected by the blacklist
    pub blocked: AtomicU64,
    /// Requests rejected by the rate limiter
    pub rate_limited: AtomicU64,
    /// Requests that failed to render or deliver
    pub failed: AtomicU64,
    /// Provider calls beyond the first attempt
    pub retries: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub requests: u64,
    pub sent: u64,
    pub duplicates: u64,
    pub blocked: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub retries: u64,
}

/// Runs one `SendRequest` through the reliability pipeline:
/// idempotency, blacklist, rate limit, render, send with retry.
pub struct NotificationDispatcher {
    registry: Arc<SenderRegistry>,
    configs: Arc<dyn ChannelConfigSource>,
    templates: Arc<dyn TemplateSource>,
    renderer: TemplateRenderer,
    idempotency: Arc<dyn IdempotencyStore>,
    blacklist: Arc<dyn BlacklistChecker>,
    rate_limiter: Arc<dyn RateLimiter>,
    interceptors: Vec<Arc<dyn DispatchInterceptor>>,
    instrumentation: Arc<dyn DispatchInstrumentation>,
    retry_policy: RetryPolicy,
    stats: DispatcherStats,
}

impl NotificationDispatcher {
    pub fn builder(
        registry: Arc<SenderRegistry>,
        configs: Arc<dyn ChannelConfigSource>,
    ) -> DispatcherBuilder {
        DispatcherBuilder::new(registry, configs)
    }

    /// Get dispatcher statistics
    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn registry(&self) -> &Arc<SenderRegistry> {
        &self.registry
    }

    /// Deliver `request`, returning the provider receipt.
    ///
    /// A request id that already has a recorded receipt returns that receipt
    /// without calling the provider. Failed deliveries are not recorded, so the
    /// caller may retry with the same id.
    #[tracing::instrument(
        name = "dispatcher.dispatch",
        skip(self, request),
        fields(
            request_id = %request.request_id(),
            tenant_id = %request.tenant_id(),
            channel = %request.channel_type()
        )
    )]
    pub async fn dispatch(&self, request: &SendRequest) -> Result<SendReceipt> {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);

        if let Some(receipt) = self
            .idempotency
            .get(request.tenant_id(), request.request_id())
            .await?
        {
            self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
            self.instrumentation.on_short_circuit(request, ShortCircuit::Duplicate);
            tracing::debug!("Duplicate request, returning recorded receipt");
            return Ok(receipt);
        }

        if self.blacklist.is_blacklisted(request).await? {
            self.stats.blocked.fetch_add(1, Ordering::Relaxed);
            self.instrumentation.on_short_circuit(request, ShortCircuit::Blacklisted);
            tracing::info!(recipient = %request.target(), "Target is blacklisted");
            return Err(DispatchError::Blacklisted(request.target().to_string()));
        }

        if !self.rate_limiter.allow(request).await? {
            self.stats.rate_limited.fetch_add(1, Ordering::Relaxed);
            self.instrumentation.on_short_circuit(request, ShortCircuit::RateLimited);
            tracing::info!(recipient = %request.target(), "Rate limit exceeded");
            return Err(DispatchError::RateLimitExceeded(request.target().to_string()));
        }
        self.rate_limiter.record(request).await?;

        let render_started = Instant::now();
        let rendered = self.render(request);
        self.instrumentation
            .on_render(request, render_started.elapsed(), rendered.is_ok());
        let content = match rendered {
            Ok(content) => content,
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Render failed");
                return Err(e);
            }
        };

        for interceptor in &self.interceptors {
            interceptor.before_send(request).await;
        }

        let dispatch_started = Instant::now();
        let outcome = self.deliver(request, &content).await;
        self.instrumentation
            .on_dispatch(request, dispatch_started.elapsed(), outcome.as_ref());

        match outcome {
            Ok(receipt) => {
                for interceptor in &self.interceptors {
                    interceptor.after_send(request, &receipt).await;
                }

                // Already delivered: a store failure is logged, never returned
                if let Err(e) = self
                    .idempotency
                    .put(request.tenant_id(), request.request_id(), &receipt)
                    .await
                {
                    tracing::warn!(error = %e, "Failed to record idempotency receipt");
                }

                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    provider_message_id = %receipt.provider_message_id,
                    attempts = receipt.attempts,
                    "Notification sent"
                );
                Ok(receipt)
            }
            Err(e) => {
                for interceptor in &self.interceptors {
                    interceptor.on_error(request, &e).await;
                }

                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, code = e.root().code(), "Notification delivery failed");
                Err(e)
            }
        }
    }

    /// Resolve content for the request's locale and render it. Only an
    /// unknown template id fails; rendering itself never does.
    fn render(&self, request: &SendRequest) -> Result<RenderedContent> {
        let locale = Locale::from_option(request.locale());

        let (source, vendor_template_code) = match request.content() {
            MessageContent::Raw { content } => (content.clone(), None),
            MessageContent::Template { template_id } => {
                let resolved = self
                    .templates
                    .resolve(template_id, &locale)
                    .map_err(|e| match e {
                        TemplateError::NotFound(id) => DispatchError::TemplateNotFound(id),
                        other => DispatchError::TemplateNotFound(other.to_string()),
                    })?;
                (resolved.content, resolved.vendor_template_code)
            }
        };

        Ok(RenderedContent {
            body: self.renderer.render(&source, &locale, request.variables()),
            vendor_template_code,
        })
    }

    /// Resolve the sender and call it under the retry policy. Every failure
    /// comes back as `DeliveryFailed` carrying the number of provider calls.
    async fn deliver(&self, request: &SendRequest, content: &RenderedContent) -> Result<SendReceipt> {
        let failed = |attempts: u32, source: DispatchError| DispatchError::DeliveryFailed {
            request_id: request.request_id().to_string(),
            attempts,
            source: Box::new(source),
        };

        let config = self
            .configs
            .configuration_for(request.tenant_id(), request.channel_type())
            .await
            .map_err(|e| failed(0, e))?;

        let sender = self
            .registry
            .resolve(request.channel_type(), &config)
            .await
            .map_err(|e| failed(0, e))?;

        let result = retry_with_policy(
            &self.retry_policy,
            "sender.send",
            DispatchError::is_retryable,
            |attempt| {
                if attempt > 1 {
                    self.stats.retries.fetch_add(1, Ordering::Relaxed);
                }
                sender.send(request, content)
            },
        )
        .await;

        match result {
            Ok(done) => Ok(SendReceipt {
                request_id: request.request_id().to_string(),
                channel_type: sender.channel_type().to_string(),
                provider_message_id: done.value,
                attempts: done.attempts,
                sent_at: Utc::now(),
            }),
            Err(failure) => Err(failed(failure.attempts, failure.value)),
        }
    }
}

/// Builder for `NotificationDispatcher`.
///
/// Everything except the registry and the configuration source has an
/// in-memory default.
pub struct DispatcherBuilder {
    registry: Arc<SenderRegistry>,
    configs: Arc<dyn ChannelConfigSource>,
    templates: Option<Arc<dyn TemplateSource>>,
    renderer: TemplateRenderer,
    idempotency: Option<Arc<dyn IdempotencyStore>>,
    blacklist: Option<Arc<dyn BlacklistChecker>>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    interceptors: Vec<Arc<dyn DispatchInterceptor>>,
    instrumentation: Arc<dyn DispatchInstrumentation>,
    retry_policy: RetryPolicy,
}

impl DispatcherBuilder {
    pub fn new(registry: Arc<SenderRegistry>, configs: Arc<dyn ChannelConfigSource>) -> Self {
        Self {
            registry,
            configs,
            templates: None,
            renderer: TemplateRenderer::default(),
            idempotency: None,
            blacklist: None,
            rate_limiter: None,
            interceptors: Vec::new(),
            instrumentation: Arc::new(NoopInstrumentation),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn templates(mut self, templates: Arc<dyn TemplateSource>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn renderer(mut self, renderer: TemplateRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn idempotency(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }

    pub fn blacklist(mut self, blacklist: Arc<dyn BlacklistChecker>) -> Self {
        self.blacklist = Some(blacklist);
        self
    }

    pub fn rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn DispatchInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn instrumentation(mut self, instrumentation: Arc<dyn DispatchInstrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn build(self) -> NotificationDispatcher {
        NotificationDispatcher {
            registry: self.registry,
            configs: self.configs,
            templates: self
                .templates
                .unwrap_or_else(|| Arc::new(TemplateStore::new())),
            renderer: self.renderer,
            idempotency: self
                .idempotency
                .unwrap_or_else(|| Arc::new(MemoryIdempotencyStore::new(0))),
            blacklist: self
                .blacklist
                .unwrap_or_else(|| Arc::new(MemoryBlacklist::new())),
            rate_limiter: self
                .rate_limiter
                .unwrap_or_else(|| Arc::new(FixedWindowRateLimiter::new(Default::default()))),
            interceptors: self.interceptors,
            instrumentation: self.instrumentation,
            retry_policy: self.retry_policy,
            stats: DispatcherStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{Sender, SenderFactory};
    use crate::config::{RateLimitConfig, RegistryConfig};
    use crate::notification::{SenderConfiguration, StaticChannelConfigs, TemplateArgs};
    use crate::registry::Discoverable;
    use crate::retry::BackoffConfig;
    use crate::template::Template;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// Fails with the scripted errors first, then succeeds
    struct ScriptedSender {
        calls: Arc<AtomicU32>,
        transient_failures: u32,
        fatal: bool,
    }

    #[async_trait]
    impl Sender for ScriptedSender {
        fn channel_type(&self) -> &str {
            "test"
        }

        async fn configure(&self, _: &SenderConfiguration) -> Result<()> {
            Ok(())
        }

        async fn send(&self, _: &SendRequest, content: &RenderedContent) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fatal {
                return Err(DispatchError::Provider("rejected".into()));
            }
            if call <= self.transient_failures {
                return Err(DispatchError::TransientProvider(format!("busy #{}", call)));
            }
            Ok(format!("msg-{}:{}", call, content.body))
        }
    }

    struct ScriptedFactory {
        calls: Arc<AtomicU32>,
        transient_failures: u32,
        fatal: bool,
    }

    impl Discoverable for ScriptedFactory {
        fn kind(&self) -> &str {
            "test"
        }
    }

    impl SenderFactory for ScriptedFactory {
        fn create(&self) -> Result<Arc<dyn Sender>> {
            Ok(Arc::new(ScriptedSender {
                calls: Arc::clone(&self.calls),
                transient_failures: self.transient_failures,
                fatal: self.fatal,
            }))
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: BackoffConfig {
                initial_delay_ms: 1,
                max_delay_ms: 2,
                multiplier: 1.0,
                jitter_factor: 0.0,
            },
        }
    }

    fn dispatcher(transient_failures: u32, fatal: bool) -> (DispatcherBuilder, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = Arc::new(SenderRegistry::new(RegistryConfig::default()));
        registry.discover_channels(vec![Arc::new(ScriptedFactory {
            calls: Arc::clone(&calls),
            transient_failures,
            fatal,
        }) as Arc<dyn SenderFactory>]);

        let builder = NotificationDispatcher::builder(registry, Arc::new(StaticChannelConfigs::new()))
            .retry_policy(fast_retry(3));
        (builder, calls)
    }

    fn request(id: &str) -> SendRequest {
        SendRequest::builder(id, "test", "+111")
            .content("Hello {0}")
            .variables(TemplateArgs::positional(["Bob"]))
            .build()
    }

    #[tokio::test]
    async fn test_duplicate_request_calls_provider_once() {
        let (builder, calls) = dispatcher(0, false);
        let dispatcher = builder.build();

        let first = dispatcher.dispatch(&request("r1")).await.unwrap();
        let second = dispatcher.dispatch(&request("r1")).await.unwrap();

        assert_eq!(first.provider_message_id, "msg-1:Hello Bob");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().duplicates, 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_kth_attempt() {
        let (builder, calls) = dispatcher(2, false);
        let dispatcher = builder.build();

        let receipt = dispatcher.dispatch(&request("r1")).await.unwrap();
        assert_eq!(receipt.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(dispatcher.stats().retries, 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_not_recorded() {
        let (builder, calls) = dispatcher(5, false);
        let dispatcher = builder.build();

        let err = dispatcher.dispatch(&request("r1")).await.unwrap_err();
        match &err {
            DispatchError::DeliveryFailed { attempts, source, .. } => {
                assert_eq!(*attempts, 3);
                assert!(matches!(**source, DispatchError::TransientProvider(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // Same request id may be attempted again
        assert!(dispatcher.dispatch(&request("r1")).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_stops_immediately() {
        let (builder, calls) = dispatcher(0, true);
        let dispatcher = builder.build();

        let err = dispatcher.dispatch(&request("r1")).await.unwrap_err();
        assert!(matches!(err.root(), DispatchError::Provider(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_blacklisted_target_never_reaches_sender() {
        let blacklist = Arc::new(MemoryBlacklist::new());
        blacklist.add("+111");
        let limiter = Arc::new(FixedWindowRateLimiter::new(RateLimitConfig {
            max_per_target: 1,
            ..Default::default()
        }));

        let (builder, calls) = dispatcher(0, false);
        let dispatcher = builder.blacklist(blacklist).rate_limiter(limiter.clone()).build();

        for id in ["r1", "r2"] {
            assert!(matches!(
                dispatcher.dispatch(&request(id)).await,
                Err(DispatchError::Blacklisted(_))
            ));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(limiter.count_for(&request("r1")), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_then_reset() {
        let limiter = Arc::new(FixedWindowRateLimiter::new(RateLimitConfig {
            max_per_target: 2,
            ..Default::default()
        }));
        let (builder, calls) = dispatcher(0, false);
        let dispatcher = builder.rate_limiter(limiter.clone()).build();

        dispatcher.dispatch(&request("r1")).await.unwrap();
        dispatcher.dispatch(&request("r2")).await.unwrap();
        assert!(matches!(
            dispatcher.dispatch(&request("r3")).await,
            Err(DispatchError::RateLimitExceeded(_))
        ));

        limiter.reset().await;
        dispatcher.dispatch(&request("r3")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_template_lookup_and_missing_template() {
        let templates = Arc::new(TemplateStore::new());
        templates
            .create(Template::new("greet", "Greeting", "Hello {name}").with_translation("fr", "Bonjour {name}"))
            .unwrap();

        let (builder, calls) = dispatcher(0, false);
        let dispatcher = builder.templates(templates).build();

        let fr = SendRequest::builder("r1", "test", "+111")
            .template("greet")
            .variables(TemplateArgs::named(serde_json::json!({"name": "Ann"})).unwrap())
            .locale("fr-FR")
            .build();
        let receipt = dispatcher.dispatch(&fr).await.unwrap();
        assert!(receipt.provider_message_id.ends_with("Bonjour Ann"));

        let missing = SendRequest::builder("r2", "test", "+111").template("nope").build();
        assert!(matches!(
            dispatcher.dispatch(&missing).await,
            Err(DispatchError::TemplateNotFound(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_channel_is_wrapped() {
        let (builder, _) = dispatcher(0, false);
        let dispatcher = builder.build();
        let fax = SendRequest::builder("r1", "fax", "+111").content("x").build();

        let err = dispatcher.dispatch(&fax).await.unwrap_err();
        assert!(matches!(err, DispatchError::DeliveryFailed { attempts: 0, .. }));
        assert!(matches!(err.root(), DispatchError::ChannelNotSupported(_)));
    }
}
