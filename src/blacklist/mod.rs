//! Target blacklist.

use async_trait::async_trait;
use dashmap::DashSet;

use crate::config::BlacklistConfig;
use crate::error::Result;
use crate::notification::SendRequest;

#[async_trait]
pub trait BlacklistChecker: Send + Sync {
    async fn is_blacklisted(&self, request: &SendRequest) -> Result<bool>;
}

/// Normalized form used for comparison: trimmed and lower-cased
fn normalize(target: &str) -> String {
    target.trim().to_lowercase()
}

/// In-memory blacklist seeded from settings.
///
/// Entries match the bare target (`+15550001111`) or a tenant-scoped
/// `tenant/target` pair.
#[derive(Debug, Default)]
pub struct MemoryBlacklist {
    targets: DashSet<String>,
}

impl MemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &BlacklistConfig) -> Self {
        let blacklist = Self::new();
        for target in &config.targets {
            blacklist.add(target);
        }
        if !blacklist.is_empty() {
            tracing::info!(entries = blacklist.len(), "Blacklist seeded from settings");
        }
        blacklist
    }

    pub fn add(&self, target: &str) -> bool {
        let normalized = normalize(target);
        !normalized.is_empty() && self.targets.insert(normalized)
    }

    pub fn add_for_tenant(&self, tenant_id: &str, target: &str) -> bool {
        self.add(&format!("{}/{}", tenant_id.trim(), target.trim()))
    }

    pub fn remove(&self, target: &str) -> bool {
        self.targets.remove(&normalize(target)).is_some()
    }

    pub fn contains(&self, tenant_id: &str, target: &str) -> bool {
        let target = normalize(target);
        self.targets.contains(&target)
            || self
                .targets
                .contains(&format!("{}/{}", normalize(tenant_id), target))
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl BlacklistChecker for MemoryBlacklist {
    async fn is_blacklisted(&self, request: &SendRequest) -> Result<bool> {
        Ok(self.contains(request.tenant_id(), request.target()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_and_tenant_scoped_entries() {
        let blacklist = MemoryBlacklist::from_config(&BlacklistConfig {
            targets: vec!["+15550001111".into(), " Spam@Example.com ".into(), "".into()],
        });
        blacklist.add_for_tenant("acme", "+15550002222");

        assert_eq!(blacklist.len(), 3);

        let blocked = SendRequest::builder("r1", "email", "spam@example.com").build();
        assert!(blacklist.is_blacklisted(&blocked).await.unwrap());

        let acme = SendRequest::builder("r2", "sms", "+15550002222").tenant("acme").build();
        let other = SendRequest::builder("r3", "sms", "+15550002222").tenant("globex").build();
        assert!(blacklist.is_blacklisted(&acme).await.unwrap());
        assert!(!blacklist.is_blacklisted(&other).await.unwrap());
    }

    #[test]
    fn test_remove() {
        let blacklist = MemoryBlacklist::new();
        assert!(blacklist.add("x"));
        assert!(!blacklist.add("X"));
        assert!(blacklist.remove("x"));
        assert!(!blacklist.contains("default", "x"));
    }
}
