use thiserror::Error;

/// Errors raised by the dispatch engine.
///
/// Policy rejections (`Blacklisted`, `RateLimitExceeded`) and configuration
/// problems are fatal for the current attempt. Only `TransientProvider` is
/// retried by the pipeline.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Channel not supported: {0}")]
    ChannelNotSupported(String),

    #[error("Target is blacklisted: {0}")]
    Blacklisted(String),

    #[error("Rate limit exceeded for target: {0}")]
    RateLimitExceeded(String),

    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    #[error("Provider rejected message: {0}")]
    Provider(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Delivery of {request_id} failed after {attempts} attempt(s): {source}")]
    DeliveryFailed {
        request_id: String,
        attempts: u32,
        #[source]
        source: Box<DispatchError>,
    },

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Whether the pipeline may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::TransientProvider(_))
    }

    /// Stable machine-readable code, used as a metric label and in notices.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Configuration(_) => "CONFIGURATION",
            DispatchError::ChannelNotSupported(_) => "CHANNEL_NOT_SUPPORTED",
            DispatchError::Blacklisted(_) => "BLACKLISTED",
            DispatchError::RateLimitExceeded(_) => "RATE_LIMITED",
            DispatchError::TransientProvider(_) => "TRANSIENT_PROVIDER",
            DispatchError::Provider(_) => "PROVIDER",
            DispatchError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            DispatchError::DeliveryFailed { .. } => "DELIVERY_FAILED",
            DispatchError::Queue(_) => "QUEUE",
            DispatchError::Store(_) => "STORE",
            DispatchError::Serialization(_) => "SERIALIZATION",
        }
    }

    /// The innermost error of a `DeliveryFailed` wrapper, or `self`.
    pub fn root(&self) -> &DispatchError {
        match self {
            DispatchError::DeliveryFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Errors raised while assembling the application at startup.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
