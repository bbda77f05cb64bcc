mod settings;

pub use settings::{
    BlacklistConfig, ChannelConfigMap, DispatchConfig, IdempotencyConfig, OtelConfig,
    QueueConfig, RateLimitConfig, RedisConfig, RegistryConfig, ServerConfig, Settings,
};
