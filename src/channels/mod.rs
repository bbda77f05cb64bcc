//! Delivery channels.
//!
//! A channel is a `Sender` built by a `SenderFactory`. The registry creates
//! one sender per distinct configuration and configures it once before use.
//!
//! Built-in channels:
//! - `console`: writes the rendered message to the log
//! - `email`: SMTP relay (`host`, `from`)
//!
//! Every built-in vendor channel accepts `dryRun = true`, which logs the
//! outgoing message instead of delivering it.
//! - `sms`: delegates to the sub-provider named by the `provider` key

pub mod console;
pub mod email;
pub mod sms;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{DispatchError, Result};
use crate::notification::{RenderedContent, SendRequest, SenderConfiguration};
use crate::registry::Discoverable;

pub use console::{ConsoleSender, ConsoleSenderFactory};
pub use email::{EmailSender, EmailSenderFactory};
pub use sms::{SmsChannelFactory, SmsSender};

/// A configured delivery channel instance.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Channel type this sender delivers on
    fn channel_type(&self) -> &str;

    /// Apply configuration. Called exactly once per instance before any send;
    /// missing or invalid keys fail with `DispatchError::Configuration`.
    async fn configure(&self, config: &SenderConfiguration) -> Result<()>;

    /// Deliver one message, returning the provider's message id.
    async fn send(&self, request: &SendRequest, content: &RenderedContent) -> Result<String>;

    /// Release resources. Called when the instance leaves the registry.
    async fn destroy(&self) {}
}

/// Builds fresh, unconfigured senders for one channel type.
pub trait SenderFactory: Discoverable {
    fn create(&self) -> Result<Arc<dyn Sender>>;
}

/// Boolean configuration flag; absent means false.
pub(crate) fn flag(config: &SenderConfiguration, key: &str) -> Result<bool> {
    match config.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" || v.is_empty() => Ok(false),
        Some(v) => Err(DispatchError::Configuration(format!(
            "'{}' must be a boolean, got '{}'",
            key, v
        ))),
    }
}

/// The channel factories shipped with this crate.
pub fn builtin_senders(sms_providers: Arc<sms::ProviderCatalog>) -> Vec<Arc<dyn SenderFactory>> {
    vec![
        Arc::new(ConsoleSenderFactory),
        Arc::new(EmailSenderFactory),
        Arc::new(SmsChannelFactory::new(sms_providers)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_kinds() {
        let providers = Arc::new(sms::ProviderCatalog::new("sms provider"));
        let kinds: Vec<String> = builtin_senders(providers)
            .iter()
            .map(|f| f.kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["console", "email", "sms"]);
    }

    #[test]
    fn test_flag_parsing() {
        let config = SenderConfiguration::new().with("dryRun", "TRUE").with("other", "maybe");
        assert!(flag(&config, "dryRun").unwrap());
        assert!(!flag(&config, "missing").unwrap());
        assert!(matches!(
            flag(&config, "other"),
            Err(DispatchError::Configuration(_))
        ));
    }
}
