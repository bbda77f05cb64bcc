//! Per-tenant channel configuration lookup.

use std::collections::HashMap;

use async_trait::async_trait;

use super::SenderConfiguration;
use crate::config::{ChannelConfigMap, Settings};
use crate::error::Result;
use crate::registry::normalize_kind;

/// Supplies the sender configuration for a tenant's channel.
#[async_trait]
pub trait ChannelConfigSource: Send + Sync {
    async fn configuration_for(&self, tenant_id: &str, channel_type: &str) -> Result<SenderConfiguration>;
}

/// Channel configuration read once from settings.
///
/// A tenant-scoped entry for the channel wins as a whole; otherwise the global
/// entry is used; otherwise the configuration is empty and the sender decides
/// whether that is acceptable.
#[derive(Debug, Clone, Default)]
pub struct StaticChannelConfigs {
    global: HashMap<String, SenderConfiguration>,
    tenants: HashMap<String, HashMap<String, SenderConfiguration>>,
}

fn convert(map: &ChannelConfigMap) -> HashMap<String, SenderConfiguration> {
    map.iter()
        .map(|(channel, entries)| {
            (
                normalize_kind(channel),
                entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            )
        })
        .collect()
}

impl StaticChannelConfigs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            global: convert(&settings.channels),
            tenants: settings
                .tenants
                .iter()
                .map(|(tenant, channels)| (tenant.clone(), convert(channels)))
                .collect(),
        }
    }

    pub fn with_global(mut self, channel_type: &str, config: SenderConfiguration) -> Self {
        self.global.insert(normalize_kind(channel_type), config);
        self
    }

    pub fn with_tenant(mut self, tenant_id: &str, channel_type: &str, config: SenderConfiguration) -> Self {
        self.tenants
            .entry(tenant_id.to_string())
            .or_default()
            .insert(normalize_kind(channel_type), config);
        self
    }

    pub fn lookup(&self, tenant_id: &str, channel_type: &str) -> SenderConfiguration {
        let channel = normalize_kind(channel_type);
        self.tenants
            .get(tenant_id)
            .and_then(|channels| channels.get(&channel))
            .or_else(|| self.global.get(&channel))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChannelConfigSource for StaticChannelConfigs {
    async fn configuration_for(&self, tenant_id: &str, channel_type: &str) -> Result<SenderConfiguration> {
        Ok(self.lookup(tenant_id, channel_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_entry_wins_over_global() {
        let mut settings = Settings::default();
        settings.channels.insert(
            "SMS".to_string(),
            HashMap::from([("provider".to_string(), "aliyun".to_string())]),
        );
        settings.tenants.insert(
            "acme".to_string(),
            HashMap::from([(
                "sms".to_string(),
                HashMap::from([("provider".to_string(), "tencent".to_string())]),
            )]),
        );

        let configs = StaticChannelConfigs::from_settings(&settings);
        assert_eq!(configs.lookup("acme", "sms").get("provider"), Some("tencent"));
        assert_eq!(configs.lookup("globex", "sms").get("provider"), Some("aliyun"));
        assert!(configs.lookup("acme", "email").is_empty());
    }

    #[tokio::test]
    async fn test_builder_entries() {
        let configs = StaticChannelConfigs::new()
            .with_global("email", SenderConfiguration::new().with("host", "smtp"))
            .with_tenant("acme", "email", SenderConfiguration::new().with("host", "acme-smtp"));

        let acme = configs.configuration_for("acme", "EMAIL").await.unwrap();
        assert_eq!(acme.get("host"), Some("acme-smtp"));
    }
}
