//! Notice records: the persisted view of one notification's lifecycle.
//!
//! The dispatcher never touches notices directly. `NoticeRecorder` is an
//! interceptor that creates a `Pending` notice before the send and moves it
//! to `Sent` or `Failed` afterwards. `Read` and `Recalled` are set by
//! collaborators through the store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{DispatchInterceptor, SendReceipt, SendRequest};
use crate::error::{DispatchError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NoticeStatus {
    Pending,
    Sent,
    Failed,
    Read,
    Recalled,
}

impl NoticeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoticeStatus::Pending => "PENDING",
            NoticeStatus::Sent => "SENT",
            NoticeStatus::Failed => "FAILED",
            NoticeStatus::Read => "READ",
            NoticeStatus::Recalled => "RECALLED",
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum NoticeError {
    #[error("Notice not found: {0}")]
    NotFound(Uuid),

    #[error("Cannot move notice from {from:?} to {to:?}")]
    InvalidTransition { from: NoticeStatus, to: NoticeStatus },
}

impl From<NoticeError> for DispatchError {
    fn from(e: NoticeError) -> Self {
        DispatchError::Store(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub id: Uuid,
    pub tenant_id: String,
    pub channel_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    pub target: String,
    pub status: NoticeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recall_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notice {
    /// A new `Pending` notice for a request
    pub fn pending(request: &SendRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: request.tenant_id().to_string(),
            channel_type: request.channel_type().to_string(),
            template_id: request.template_id().map(str::to_string),
            target: request.target().to_string(),
            status: NoticeStatus::Pending,
            fail_reason: None,
            send_time: None,
            read_time: None,
            recall_time: None,
            trace_id: current_trace_id(),
            request_id: request.request_id().to_string(),
            provider_message_id: None,
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, to: NoticeStatus, allowed_from: &[NoticeStatus]) -> std::result::Result<(), NoticeError> {
        if !allowed_from.contains(&self.status) {
            return Err(NoticeError::InvalidTransition { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }

    /// Back to `Pending` for a new delivery attempt of a failed request
    pub fn restart(&mut self) -> std::result::Result<(), NoticeError> {
        self.transition(NoticeStatus::Pending, &[NoticeStatus::Pending, NoticeStatus::Failed])?;
        self.fail_reason = None;
        self.trace_id = current_trace_id().or(self.trace_id.take());
        Ok(())
    }

    pub fn mark_sent(&mut self, receipt: &SendReceipt) -> std::result::Result<(), NoticeError> {
        self.transition(NoticeStatus::Sent, &[NoticeStatus::Pending])?;
        self.send_time = Some(receipt.sent_at);
        self.provider_message_id = Some(receipt.provider_message_id.clone());
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> std::result::Result<(), NoticeError> {
        self.transition(NoticeStatus::Failed, &[NoticeStatus::Pending])?;
        self.fail_reason = Some(reason.into());
        Ok(())
    }

    pub fn mark_read(&mut self) -> std::result::Result<(), NoticeError> {
        self.transition(NoticeStatus::Read, &[NoticeStatus::Sent])?;
        self.read_time = Some(Utc::now());
        Ok(())
    }

    pub fn recall(&mut self) -> std::result::Result<(), NoticeError> {
        self.transition(
            NoticeStatus::Recalled,
            &[NoticeStatus::Pending, NoticeStatus::Sent, NoticeStatus::Read],
        )?;
        self.recall_time = Some(Utc::now());
        Ok(())
    }
}

/// Id of the current tracing span, used to correlate a notice with logs
fn current_trace_id() -> Option<String> {
    tracing::Span::current()
        .id()
        .map(|id| format!("{:016x}", id.into_u64()))
}

/// Notice persistence
#[async_trait]
pub trait NoticeStore: Send + Sync {
    /// Insert or replace a notice
    async fn save(&self, notice: Notice) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Notice>>;

    async fn find_by_request(&self, tenant_id: &str, request_id: &str) -> Result<Option<Notice>>;

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Notice>>;
}

/// In-memory notice store
#[derive(Default)]
pub struct MemoryNoticeStore {
    notices: DashMap<Uuid, Notice>,
    by_request: DashMap<(String, String), Uuid>,
}

impl MemoryNoticeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.notices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notices.is_empty()
    }

    /// Mark a sent notice as read by its recipient
    pub fn mark_read(&self, id: Uuid) -> Result<Notice> {
        self.update(id, Notice::mark_read)
    }

    /// Withdraw a notice
    pub fn recall(&self, id: Uuid) -> Result<Notice> {
        self.update(id, Notice::recall)
    }

    fn update(
        &self,
        id: Uuid,
        apply: impl FnOnce(&mut Notice) -> std::result::Result<(), NoticeError>,
    ) -> Result<Notice> {
        let mut notice = self.notices.get_mut(&id).ok_or(NoticeError::NotFound(id))?;
        apply(notice.value_mut())?;
        Ok(notice.value().clone())
    }
}

#[async_trait]
impl NoticeStore for MemoryNoticeStore {
    async fn save(&self, notice: Notice) -> Result<()> {
        self.by_request.insert(
            (notice.tenant_id.clone(), notice.request_id.clone()),
            notice.id,
        );
        self.notices.insert(notice.id, notice);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Notice>> {
        Ok(self.notices.get(&id).map(|n| n.clone()))
    }

    async fn find_by_request(&self, tenant_id: &str, request_id: &str) -> Result<Option<Notice>> {
        let id = self
            .by_request
            .get(&(tenant_id.to_string(), request_id.to_string()))
            .map(|id| *id);
        match id {
            Some(id) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Notice>> {
        let mut notices: Vec<Notice> = self
            .notices
            .iter()
            .filter(|n| n.tenant_id == tenant_id)
            .map(|n| n.clone())
            .collect();
        notices.sort_by_key(|n| n.created_at);
        Ok(notices)
    }
}

/// Interceptor that keeps a notice per request in step with the pipeline.
///
/// Store failures are logged; they never fail the send.
pub struct NoticeRecorder {
    store: Arc<dyn NoticeStore>,
}

impl NoticeRecorder {
    pub fn new(store: Arc<dyn NoticeStore>) -> Self {
        Self { store }
    }

    async fn with_notice<F>(&self, request: &SendRequest, step: &'static str, apply: F)
    where
        F: FnOnce(&mut Notice) -> std::result::Result<(), NoticeError> + Send,
    {
        let result: Result<()> = async {
            let Some(mut notice) = self
                .store
                .find_by_request(request.tenant_id(), request.request_id())
                .await?
            else {
                tracing::warn!(request_id = %request.request_id(), step, "No notice recorded for request");
                return Ok(());
            };
            apply(&mut notice)?;
            self.store.save(notice).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(request_id = %request.request_id(), step, error = %e, "Failed to update notice");
        }
    }
}

#[async_trait]
impl DispatchInterceptor for NoticeRecorder {
    async fn before_send(&self, request: &SendRequest) {
        let result: Result<()> = async {
            let notice = match self
                .store
                .find_by_request(request.tenant_id(), request.request_id())
                .await?
            {
                Some(mut existing) => {
                    existing.restart()?;
                    existing
                }
                None => Notice::pending(request),
            };
            self.store.save(notice).await
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(request_id = %request.request_id(), error = %e, "Failed to record pending notice");
        }
    }

    async fn after_send(&self, request: &SendRequest, receipt: &SendReceipt) {
        self.with_notice(request, "after_send", |notice| notice.mark_sent(receipt))
            .await;
    }

    async fn on_error(&self, request: &SendRequest, error: &DispatchError) {
        let reason = error.root().to_string();
        self.with_notice(request, "on_error", move |notice| notice.mark_failed(reason))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> SendRequest {
        SendRequest::builder(id, "sms", "+8613800000000")
            .tenant("acme")
            .template("welcome")
            .build()
    }

    fn receipt(id: &str) -> SendReceipt {
        SendReceipt {
            request_id: id.to_string(),
            channel_type: "sms".to_string(),
            provider_message_id: "biz-1".to_string(),
            attempts: 1,
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_transitions() {
        let mut notice = Notice::pending(&request("r1"));
        assert_eq!(notice.template_id.as_deref(), Some("welcome"));

        assert!(notice.mark_read().is_err());
        notice.mark_sent(&receipt("r1")).unwrap();
        notice.mark_read().unwrap();
        assert!(notice.read_time.is_some());
        notice.recall().unwrap();
        assert_eq!(notice.status, NoticeStatus::Recalled);
        assert_eq!(
            notice.mark_failed("late"),
            Err(NoticeError::InvalidTransition {
                from: NoticeStatus::Recalled,
                to: NoticeStatus::Failed
            })
        );
    }

    #[tokio::test]
    async fn test_recorder_success_path() {
        let store = Arc::new(MemoryNoticeStore::new());
        let recorder = NoticeRecorder::new(store.clone());
        let req = request("r1");

        recorder.before_send(&req).await;
        let pending = store.find_by_request("acme", "r1").await.unwrap().unwrap();
        assert_eq!(pending.status, NoticeStatus::Pending);

        recorder.after_send(&req, &receipt("r1")).await;
        let sent = store.get(pending.id).await.unwrap().unwrap();
        assert_eq!(sent.status, NoticeStatus::Sent);
        assert_eq!(sent.provider_message_id.as_deref(), Some("biz-1"));

        let read = store.mark_read(sent.id).unwrap();
        assert_eq!(read.status, NoticeStatus::Read);
    }

    #[tokio::test]
    async fn test_recorder_failure_then_retry_reuses_notice() {
        let store = Arc::new(MemoryNoticeStore::new());
        let recorder = NoticeRecorder::new(store.clone());
        let req = request("r2");

        recorder.before_send(&req).await;
        let error = DispatchError::DeliveryFailed {
            request_id: "r2".into(),
            attempts: 3,
            source: Box::new(DispatchError::TransientProvider("busy".into())),
        };
        recorder.on_error(&req, &error).await;

        let failed = store.find_by_request("acme", "r2").await.unwrap().unwrap();
        assert_eq!(failed.status, NoticeStatus::Failed);
        assert!(failed.fail_reason.as_deref().unwrap().contains("busy"));

        recorder.before_send(&req).await;
        let restarted = store.find_by_request("acme", "r2").await.unwrap().unwrap();
        assert_eq!(restarted.id, failed.id);
        assert_eq!(restarted.status, NoticeStatus::Pending);
        assert!(restarted.fail_reason.is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unknown_notice() {
        let store = MemoryNoticeStore::new();
        assert!(matches!(store.recall(Uuid::new_v4()), Err(DispatchError::Store(_))));
    }
}
