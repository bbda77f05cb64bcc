//! Channel and provider registry.
//!
//! Holds two catalogs (channel sender factories and SMS sub-provider
//! factories) and a cache of configured sender instances keyed by
//! `(channel type, configuration)`. Every distinct configuration gets its own
//! instance, configured exactly once.

mod catalog;

pub use catalog::{normalize_kind, Catalog, Discoverable};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::channels::sms::{self, ProviderCatalog, SmsProviderFactory, SMS_CHANNEL};
use crate::channels::{self, Sender, SenderFactory};
use crate::config::RegistryConfig;
use crate::error::{DispatchError, Result};
use crate::notification::SenderConfiguration;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    channel: String,
    config: SenderConfiguration,
}

/// One cached sender plus its configure-once guard
struct CacheSlot {
    sender: Arc<dyn Sender>,
    configured: AtomicBool,
    /// Set under `configure_lock` once the slot has left the cache and its
    /// sender is being destroyed
    retired: AtomicBool,
    configure_lock: Mutex<()>,
    /// Insertion order, used to pick the eviction victim
    seq: u64,
    /// Milliseconds since the registry epoch
    last_used_ms: AtomicU64,
}

impl CacheSlot {
    fn new(sender: Arc<dyn Sender>, seq: u64, now_ms: u64) -> Self {
        Self {
            sender,
            configured: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            configure_lock: Mutex::new(()),
            seq,
            last_used_ms: AtomicU64::new(now_ms),
        }
    }

    fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }
}

/// Outcome of `ensure_configured`
enum SlotState {
    /// Configured by an earlier caller
    Ready,
    /// Configured by this caller
    Configured,
    /// Removed from the cache while this caller waited
    Retired,
}

/// Registry counters
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub configure_failures: AtomicU64,
    pub evictions: AtomicU64,
}

/// Snapshot of registry statistics
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub configure_failures: u64,
    pub evictions: u64,
    pub cached_instances: usize,
    pub channels: Vec<String>,
    pub sms_providers: Vec<String>,
}

/// Discovers, configures and caches senders.
pub struct SenderRegistry {
    channels: Catalog<dyn SenderFactory>,
    providers: Arc<ProviderCatalog>,
    cache: DashMap<CacheKey, Arc<CacheSlot>>,
    config: RegistryConfig,
    next_seq: AtomicU64,
    /// Serializes capacity enforcement across channels
    capacity_lock: Mutex<()>,
    epoch: Instant,
    stats: RegistryStats,
}

impl SenderRegistry {
    /// Create an empty registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            channels: Catalog::new("channel"),
            providers: Arc::new(ProviderCatalog::new("sms provider")),
            cache: DashMap::new(),
            config,
            next_seq: AtomicU64::new(0),
            capacity_lock: Mutex::new(()),
            epoch: Instant::now(),
            stats: RegistryStats::default(),
        }
    }

    /// Create a registry with the built-in providers and channels discovered
    pub fn with_builtins(config: RegistryConfig) -> Self {
        let registry = Self::new(config);
        registry.discover_providers(sms::builtin_providers());
        registry.discover_channels(channels::builtin_senders(registry.providers()));
        registry
    }

    /// Index channel factories. Failing candidates are skipped.
    pub fn discover_channels<I>(&self, candidates: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn SenderFactory>>,
    {
        self.channels.discover(candidates)
    }

    /// Index SMS sub-provider factories. Run this before discovering the
    /// `sms` channel, whose probe requires at least one provider.
    pub fn discover_providers<I>(&self, candidates: I) -> usize
    where
        I: IntoIterator<Item = Arc<dyn SmsProviderFactory>>,
    {
        self.providers.discover(candidates)
    }

    /// The SMS provider catalog shared with `sms` senders
    pub fn providers(&self) -> Arc<ProviderCatalog> {
        Arc::clone(&self.providers)
    }

    pub fn channel_types(&self) -> Vec<String> {
        self.channels.kinds()
    }

    pub fn supports(&self, channel_type: &str) -> bool {
        self.channels.contains(channel_type)
    }

    /// Return the configured sender for `(channel_type, config)`.
    ///
    /// Equal configurations share one instance. A new instance is configured
    /// exactly once; concurrent callers for the same configuration wait for
    /// that configure call and share its result. Capacity eviction only runs
    /// after a successful configure and only touches configured instances.
    #[tracing::instrument(name = "registry.resolve", skip(self, config), fields(config_keys = config.len()))]
    pub async fn resolve(
        &self,
        channel_type: &str,
        config: &SenderConfiguration,
    ) -> Result<Arc<dyn Sender>> {
        let kind = normalize_kind(channel_type);
        let factory = self
            .channels
            .get(&kind)
            .ok_or_else(|| DispatchError::ChannelNotSupported(channel_type.to_string()))?;

        let key = CacheKey {
            channel: kind,
            config: config.clone(),
        };

        loop {
            self.expire_if_idle(&key).await;

            let (slot, created) = match self.cache.entry(key.clone()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                    let slot = Arc::new(CacheSlot::new(factory.create()?, seq, self.now_ms()));
                    entry.insert(Arc::clone(&slot));
                    (slot, true)
                }
            };

            if created {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(channel = %key.channel, "Created sender instance");
            } else {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
            }

            match self.ensure_configured(&slot, &key).await? {
                SlotState::Retired => {
                    tracing::debug!(channel = %key.channel, "Sender retired before use, resolving again");
                    continue;
                }
                SlotState::Configured => self.enforce_capacity(&key, &slot).await,
                SlotState::Ready => {}
            }

            slot.last_used_ms.store(self.now_ms(), Ordering::Relaxed);
            return Ok(Arc::clone(&slot.sender));
        }
    }

    /// Double-checked configure: atomic fast path, mutex slow path.
    async fn ensure_configured(&self, slot: &CacheSlot, key: &CacheKey) -> Result<SlotState> {
        if slot.retired.load(Ordering::Acquire) {
            return Ok(SlotState::Retired);
        }
        if slot.is_configured() {
            return Ok(SlotState::Ready);
        }

        let _guard = slot.configure_lock.lock().await;
        if slot.retired.load(Ordering::Acquire) {
            return Ok(SlotState::Retired);
        }
        if slot.is_configured() {
            return Ok(SlotState::Ready);
        }

        match slot.sender.configure(&key.config).await {
            Ok(()) => {
                slot.configured.store(true, Ordering::Release);
                tracing::info!(channel = %key.channel, "Sender configured");
                Ok(SlotState::Configured)
            }
            Err(e) => {
                self.stats.configure_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(channel = %key.channel, error = %e, "Sender configuration failed");
                Err(match e {
                    DispatchError::Configuration(_) => e,
                    other => DispatchError::Configuration(other.to_string()),
                })
            }
        }
    }

    /// Replace the factory for `channel_type`. Cached instances of that type
    /// are destroyed so later resolves build from the new factory.
    pub async fn register(&self, channel_type: &str, factory: Arc<dyn SenderFactory>) -> Result<()> {
        self.channels.register(channel_type, factory)?;
        self.invalidate(&normalize_kind(channel_type)).await;
        Ok(())
    }

    /// Replace an SMS sub-provider. Cached `sms` senders are destroyed.
    pub async fn register_provider(
        &self,
        provider: &str,
        factory: Arc<dyn SmsProviderFactory>,
    ) -> Result<()> {
        self.providers.register(provider, factory)?;
        self.invalidate(SMS_CHANNEL).await;
        Ok(())
    }

    /// Destroy and drop every cached instance of one channel type
    async fn invalidate(&self, channel: &str) {
        let keys: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|entry| entry.key().channel == channel)
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<Arc<CacheSlot>> = keys
            .iter()
            .filter_map(|key| self.cache.remove(key).map(|(_, slot)| slot))
            .collect();

        if !removed.is_empty() {
            tracing::info!(channel = %channel, count = removed.len(), "Invalidated cached senders");
        }
        destroy_slots(removed).await;
    }

    /// Evict the oldest configured instances of `key`'s channel beyond the
    /// configured maximum. The caller's own slot is never a victim.
    async fn enforce_capacity(&self, key: &CacheKey, slot: &Arc<CacheSlot>) {
        let max = self.config.max_entries_per_channel;
        if max == 0 {
            return;
        }

        let _guard = self.capacity_lock.lock().await;
        let still_cached = self
            .cache
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot));
        if !still_cached {
            return;
        }

        let mut entries: Vec<(u64, CacheKey)> = self
            .cache
            .iter()
            .filter(|entry| entry.key().channel == key.channel && entry.value().is_configured())
            .map(|entry| (entry.value().seq, entry.key().clone()))
            .collect();

        if entries.len() <= max {
            return;
        }

        entries.sort_by_key(|(seq, _)| *seq);
        let excess = entries.len() - max;

        let evicted: Vec<Arc<CacheSlot>> = entries
            .into_iter()
            .filter(|(_, candidate)| candidate != key)
            .take(excess)
            .filter_map(|(_, candidate)| {
                self.cache
                    .remove_if(&candidate, |_, slot| slot.is_configured())
                    .map(|(_, slot)| slot)
            })
            .collect();

        self.stats
            .evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        tracing::debug!(channel = %key.channel, evicted = evicted.len(), "Evicted oldest senders");
        destroy_slots(evicted).await;
    }

    async fn expire_if_idle(&self, key: &CacheKey) {
        let Some(ttl) = self.ttl() else {
            return;
        };
        let now = self.now_ms();

        if let Some((_, slot)) = self
            .cache
            .remove_if(key, |_, slot| is_idle(slot, now, ttl))
        {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(channel = %key.channel, "Expired idle sender");
            destroy_slots(vec![slot]).await;
        }
    }

    /// Destroy every instance idle longer than the TTL. Returns the count.
    pub async fn evict_idle(&self) -> usize {
        let Some(ttl) = self.ttl() else {
            return 0;
        };
        let now = self.now_ms();

        let idle: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|entry| is_idle(entry.value(), now, ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<Arc<CacheSlot>> = idle
            .iter()
            .filter_map(|key| {
                self.cache
                    .remove_if(key, |_, slot| is_idle(slot, now, ttl))
                    .map(|(_, slot)| slot)
            })
            .collect();

        let count = removed.len();
        self.stats.evictions.fetch_add(count as u64, Ordering::Relaxed);
        destroy_slots(removed).await;
        count
    }

    /// Destroy all cached instances and clear both catalogs. Idempotent.
    pub async fn destroy(&self) {
        let keys: Vec<CacheKey> = self.cache.iter().map(|entry| entry.key().clone()).collect();
        let removed: Vec<Arc<CacheSlot>> = keys
            .iter()
            .filter_map(|key| self.cache.remove(key).map(|(_, slot)| slot))
            .collect();

        let count = removed.len();
        destroy_slots(removed).await;

        self.channels.clear();
        self.providers.clear();

        tracing::info!(destroyed = count, "Sender registry destroyed");
    }

    pub fn cached_instances(&self) -> usize {
        self.cache.len()
    }

    pub fn stats(&self) -> RegistryStatsSnapshot {
        RegistryStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            configure_failures: self.stats.configure_failures.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            cached_instances: self.cache.len(),
            channels: self.channels.kinds(),
            sms_providers: self.providers.kinds(),
        }
    }

    fn ttl(&self) -> Option<Duration> {
        (self.config.ttl_seconds > 0).then(|| Duration::from_secs(self.config.ttl_seconds))
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}

/// Only configured slots count as idle; an unconfigured one may have a
/// configure call in flight.
fn is_idle(slot: &CacheSlot, now_ms: u64, ttl: Duration) -> bool {
    slot.is_configured()
        && now_ms.saturating_sub(slot.last_used_ms.load(Ordering::Relaxed)) > ttl.as_millis() as u64
}

/// Destroy removed slots. Each destroy waits for an in-flight configure on
/// the same slot, and later configure attempts see the slot as retired.
async fn destroy_slots(slots: Vec<Arc<CacheSlot>>) {
    join_all(slots.iter().map(|slot| async move {
        let _guard = slot.configure_lock.lock().await;
        slot.retired.store(true, Ordering::Release);
        slot.sender.destroy().await;
    }))
    .await;
}
