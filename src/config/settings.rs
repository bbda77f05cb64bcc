use std::collections::HashMap;
use std::env;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Per-channel key/value configuration, keyed by channel type
pub type ChannelConfigMap = HashMap<String, HashMap<String, String>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
    #[serde(default)]
    pub blacklist: BlacklistConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub otel: OtelConfig,
    /// Global channel configuration: `channels.<type>.<key>`
    #[serde(default)]
    pub channels: ChannelConfigMap,
    /// Tenant overrides: `tenants.<tenant>.<type>.<key>`
    #[serde(default)]
    pub tenants: HashMap<String, ChannelConfigMap>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Whether transient provider failures are retried
    #[serde(default = "default_true")]
    pub retry_enabled: bool,
    /// Total attempts including the first call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter factor (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Maximum configured instances cached per channel type (0 = unbounded)
    #[serde(default = "default_registry_max_entries")]
    pub max_entries_per_channel: usize,
    /// Idle time after which a cached instance is rebuilt (0 = never)
    #[serde(default)]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum sends per target per window
    #[serde(default = "default_max_per_target")]
    pub max_per_target: u32,
    /// Optional limit across all targets per window
    #[serde(default)]
    pub global_max: Option<u32>,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdempotencyConfig {
    /// "memory" (default) or "redis"
    #[serde(default = "default_memory_backend")]
    pub backend: String,
    #[serde(default = "default_idempotency_ttl")]
    pub ttl_seconds: u64,
    #[serde(default = "default_idempotency_prefix")]
    pub redis_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// "memory" (default) or "redis"
    #[serde(default = "default_memory_backend")]
    pub backend: String,
    #[serde(default = "default_queue_name")]
    pub name: String,
    /// Number of consumer workers
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_queue_prefix")]
    pub redis_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8082
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_registry_max_entries() -> usize {
    256
}

fn default_max_per_target() -> u32 {
    10
}

fn default_window_seconds() -> u64 {
    60
}

fn default_memory_backend() -> String {
    "memory".to_string()
}

fn default_idempotency_ttl() -> u64 {
    86_400 // 1 day
}

fn default_idempotency_prefix() -> String {
    "notify:idempotency".to_string()
}

fn default_queue_name() -> String {
    "notify.send".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_queue_prefix() -> String {
    "notify:queue".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "notify-dispatch".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("redis.url", default_redis_url())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // NOTIFY__RATE_LIMIT__MAX_PER_TARGET, NOTIFY__QUEUE__BACKEND, etc.
            .add_source(
                Environment::with_prefix("NOTIFY")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("blacklist.targets"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            retry_enabled: true,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_entries_per_channel: default_registry_max_entries(),
            ttl_seconds: 0,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_per_target: default_max_per_target(),
            global_max: None,
            window_seconds: default_window_seconds(),
        }
    }
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            ttl_seconds: default_idempotency_ttl(),
            redis_prefix: default_idempotency_prefix(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: default_memory_backend(),
            name: default_queue_name(),
            workers: default_workers(),
            poll_timeout_ms: default_poll_timeout_ms(),
            redis_prefix: default_queue_prefix(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
