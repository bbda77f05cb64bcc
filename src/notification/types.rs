use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Tenant used when a request does not name one
pub const DEFAULT_TENANT: &str = "default";

fn default_tenant() -> String {
    DEFAULT_TENANT.to_string()
}

/// Message body source: a stored template or literal content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Template { template_id: String },
    Raw { content: String },
}

/// Template arguments: a named map or a positional list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateArgs {
    Named(serde_json::Map<String, serde_json::Value>),
    Positional(Vec<serde_json::Value>),
}

impl TemplateArgs {
    pub fn named(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(map) => Some(TemplateArgs::Named(map)),
            _ => None,
        }
    }

    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<serde_json::Value>,
    {
        TemplateArgs::Positional(values.into_iter().map(Into::into).collect())
    }
}

/// A request to deliver one message to one target.
///
/// Immutable once built; the fields are only readable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    request_id: String,
    #[serde(default = "default_tenant")]
    tenant_id: String,
    target: String,
    #[serde(default)]
    target_type: Option<String>,
    content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    variables: Option<TemplateArgs>,
    channel_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    locale: Option<String>,
}

impl SendRequest {
    pub fn builder(
        request_id: impl Into<String>,
        channel_type: impl Into<String>,
        target: impl Into<String>,
    ) -> SendRequestBuilder {
        SendRequestBuilder::new(request_id, channel_type, target)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn target_type(&self) -> Option<&str> {
        self.target_type.as_deref()
    }

    pub fn content(&self) -> &MessageContent {
        &self.content
    }

    pub fn template_id(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Template { template_id } => Some(template_id),
            MessageContent::Raw { .. } => None,
        }
    }

    pub fn variables(&self) -> Option<&TemplateArgs> {
        self.variables.as_ref()
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }
}

/// Builder for `SendRequest`
#[derive(Debug, Clone)]
pub struct SendRequestBuilder {
    request_id: String,
    tenant_id: String,
    target: String,
    target_type: Option<String>,
    content: MessageContent,
    variables: Option<TemplateArgs>,
    channel_type: String,
    locale: Option<String>,
}

impl SendRequestBuilder {
    pub fn new(
        request_id: impl Into<String>,
        channel_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            tenant_id: default_tenant(),
            target: target.into(),
            target_type: None,
            content: MessageContent::Raw {
                content: String::new(),
            },
            variables: None,
            channel_type: channel_type.into(),
            locale: None,
        }
    }

    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn target_type(mut self, target_type: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self
    }

    /// Render from a stored template
    pub fn template(mut self, template_id: impl Into<String>) -> Self {
        self.content = MessageContent::Template {
            template_id: template_id.into(),
        };
        self
    }

    /// Render from literal content
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = MessageContent::Raw {
            content: content.into(),
        };
        self
    }

    pub fn variables(mut self, variables: TemplateArgs) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn build(self) -> SendRequest {
        SendRequest {
            request_id: self.request_id,
            tenant_id: self.tenant_id,
            target: self.target,
            target_type: self.target_type,
            content: self.content,
            variables: self.variables,
            channel_type: self.channel_type,
            locale: self.locale,
        }
    }
}

/// Opaque key/value configuration for a sender or provider.
///
/// Equality and hashing cover every entry, so a configuration doubles as the
/// registry cache key. There is no way to mutate one after construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderConfiguration {
    entries: BTreeMap<String, String>,
}

impl SenderConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, consuming the configuration
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    /// Look up a key. Falls back to a case-insensitive match because layered
    /// config sources may lower-case keys.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }

    /// Look up a required key
    pub fn require(&self, key: &str) -> Result<&str, DispatchError> {
        match self.get(key) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(DispatchError::Configuration(format!(
                "missing required configuration key '{}'",
                key
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SenderConfiguration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Final text handed to a sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub body: String,
    /// Vendor-side template code from the stored template, if any
    pub vendor_template_code: Option<String>,
}

impl RenderedContent {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            vendor_template_code: None,
        }
    }
}

/// Result of a successful send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    pub request_id: String,
    pub channel_type: String,
    pub provider_message_id: String,
    pub attempts: u32,
    pub sent_at: DateTime<Utc>,
}
