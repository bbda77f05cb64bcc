//! SMS channel.
//!
//! The `sms` sender does not talk to a vendor itself. At configure time it
//! reads the `provider` key, looks the sub-provider up in the provider
//! catalog, and builds a provider instance from the same configuration.

mod aliyun;
mod tencent;
mod vendor;

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;

use super::{Sender, SenderFactory};
use crate::error::{DispatchError, Result};
use crate::notification::{RenderedContent, SendRequest, SenderConfiguration, TemplateArgs};
use crate::registry::{Catalog, Discoverable};

pub use aliyun::{AliyunSmsProvider, AliyunSmsProviderFactory};
pub use tencent::{TencentSmsProvider, TencentSmsProviderFactory};

pub const SMS_CHANNEL: &str = "sms";

/// Configuration key that selects the sub-provider
pub const PROVIDER_KEY: &str = "provider";

/// Catalog of SMS sub-provider factories
pub type ProviderCatalog = Catalog<dyn SmsProviderFactory>;

/// One outbound text message as seen by a vendor
#[derive(Debug, Clone, Copy)]
pub struct SmsMessage<'a> {
    pub phone: &'a str,
    pub body: &'a str,
    /// Vendor template code from the stored template, overriding the configured one
    pub template_code: Option<&'a str>,
    pub params: Option<&'a TemplateArgs>,
}

/// A configured SMS vendor.
#[async_trait]
pub trait SmsProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a message, returning the vendor's message id
    async fn send(&self, message: &SmsMessage<'_>) -> Result<String>;
}

/// Builds SMS providers from configuration. Required keys are checked in
/// `build`, so a missing key surfaces as a configure failure.
pub trait SmsProviderFactory: Discoverable {
    fn build(&self, config: &SenderConfiguration) -> Result<Arc<dyn SmsProvider>>;
}

/// The SMS vendors shipped with this crate.
pub fn builtin_providers() -> Vec<Arc<dyn SmsProviderFactory>> {
    vec![
        Arc::new(AliyunSmsProviderFactory),
        Arc::new(TencentSmsProviderFactory),
    ]
}

/// Phone numbers: optional leading `+`, then 5 to 20 digits.
pub(crate) fn validate_phone(phone: &str) -> Result<()> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if (5..=20).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(DispatchError::Provider(format!("invalid phone number: {}", phone)))
    }
}

/// Vendor template parameters as a JSON object string.
///
/// Positional arguments are keyed by index, matching how vendors number
/// template slots.
pub(crate) fn params_json(params: Option<&TemplateArgs>) -> String {
    let map = match params {
        Some(TemplateArgs::Named(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(crate::template::value_to_text(v))))
            .collect(),
        Some(TemplateArgs::Positional(values)) => values
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), serde_json::Value::String(crate::template::value_to_text(v))))
            .collect(),
        None => serde_json::Map::new(),
    };
    serde_json::Value::Object(map).to_string()
}

/// The `sms` channel sender
pub struct SmsSender {
    providers: Arc<ProviderCatalog>,
    provider: OnceLock<Arc<dyn SmsProvider>>,
}

impl SmsSender {
    pub fn new(providers: Arc<ProviderCatalog>) -> Self {
        Self {
            providers,
            provider: OnceLock::new(),
        }
    }

    /// Name of the configured sub-provider, if configured
    pub fn provider_name(&self) -> Option<&str> {
        self.provider.get().map(|p| p.name())
    }
}

#[async_trait]
impl Sender for SmsSender {
    fn channel_type(&self) -> &str {
        SMS_CHANNEL
    }

    async fn configure(&self, config: &SenderConfiguration) -> Result<()> {
        let kind = config.require(PROVIDER_KEY)?;
        let factory = self.providers.get(kind).ok_or_else(|| {
            DispatchError::Configuration(format!("unknown sms provider '{}'", kind))
        })?;

        let provider = factory.build(config)?;
        let name = provider.name().to_string();
        self.provider
            .set(provider)
            .map_err(|_| DispatchError::Configuration("sms sender already configured".into()))?;
        tracing::debug!(provider = %name, "SMS sender configured");
        Ok(())
    }

    async fn send(&self, request: &SendRequest, content: &RenderedContent) -> Result<String> {
        let provider = self
            .provider
            .get()
            .ok_or_else(|| DispatchError::Configuration("sms sender used before configure".into()))?;

        let message = SmsMessage {
            phone: request.target(),
            body: &content.body,
            template_code: content.vendor_template_code.as_deref(),
            params: request.variables(),
        };

        provider.send(&message).await
    }
}

/// Factory for the `sms` channel
pub struct SmsChannelFactory {
    providers: Arc<ProviderCatalog>,
}

impl SmsChannelFactory {
    pub fn new(providers: Arc<ProviderCatalog>) -> Self {
        Self { providers }
    }
}

impl Discoverable for SmsChannelFactory {
    fn kind(&self) -> &str {
        SMS_CHANNEL
    }

    /// The channel is useless without at least one vendor.
    fn probe(&self) -> Result<()> {
        if self.providers.is_empty() {
            return Err(DispatchError::Configuration("no sms providers discovered".into()));
        }
        Ok(())
    }
}

impl SenderFactory for SmsChannelFactory {
    fn create(&self) -> Result<Arc<dyn Sender>> {
        Ok(Arc::new(SmsSender::new(Arc::clone(&self.providers))))
    }
}
