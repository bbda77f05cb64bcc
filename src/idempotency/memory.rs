use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::IdempotencyStore;
use crate::error::Result;
use crate::notification::SendReceipt;

struct Record {
    receipt: SendReceipt,
    stored_at: Instant,
}

/// In-process idempotency store with optional expiry
pub struct MemoryIdempotencyStore {
    records: DashMap<(String, String), Record>,
    /// `None` keeps records forever
    ttl: Option<Duration>,
}

impl MemoryIdempotencyStore {
    /// `ttl_seconds == 0` disables expiry
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            records: DashMap::new(),
            ttl: (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds)),
        }
    }

    #[cfg(test)]
    fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: DashMap::new(),
            ttl: Some(ttl),
        }
    }

    fn is_expired(&self, record: &Record) -> bool {
        self.ttl
            .is_some_and(|ttl| record.stored_at.elapsed() >= ttl)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn key(tenant_id: &str, request_id: &str) -> (String, String) {
    (tenant_id.to_string(), request_id.to_string())
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn get(&self, tenant_id: &str, request_id: &str) -> Result<Option<SendReceipt>> {
        let key = key(tenant_id, request_id);

        let found = match self.records.get(&key) {
            Some(record) if !self.is_expired(&record) => return Ok(Some(record.receipt.clone())),
            Some(_) => true,
            None => false,
        };

        if found {
            self.records.remove_if(&key, |_, record| self.is_expired(record));
        }
        Ok(None)
    }

    async fn put(&self, tenant_id: &str, request_id: &str, receipt: &SendReceipt) -> Result<()> {
        self.records.insert(
            key(tenant_id, request_id),
            Record {
                receipt: receipt.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn cleanup_expired(&self) -> usize {
        if self.ttl.is_none() {
            return 0;
        }
        let before = self.records.len();
        self.records.retain(|_, record| !self.is_expired(record));
        before.saturating_sub(self.records.len())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
