//! In-memory message template storage.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Locale;

/// Template-specific error type
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Template already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid template ID: {0}")]
    InvalidId(String),

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),
}

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// A message template definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    /// Unique template identifier (alphanumeric, dash, underscore)
    pub id: String,

    /// Human-readable template name
    pub name: String,

    /// Channel the template is written for (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,

    /// Default content, used when no translation matches
    pub content: String,

    /// Localized content keyed by locale tag (`zh-CN`) or language (`zh`)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub translations: HashMap<String, String>,

    /// Template code registered with the vendor (SMS providers need one)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor_template_code: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Template {
    /// Create a template with default content only
    pub fn new(id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            channel_type: None,
            content: content.into(),
            translations: HashMap::new(),
            vendor_template_code: None,
            description: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_translation(mut self, locale: impl Into<String>, content: impl Into<String>) -> Self {
        self.translations.insert(locale.into(), content.into());
        self
    }

    pub fn with_vendor_template_code(mut self, code: impl Into<String>) -> Self {
        self.vendor_template_code = Some(code.into());
        self
    }

    pub fn validate(&self) -> TemplateResult<()> {
        if self.id.is_empty() || self.id.len() > 64 {
            return Err(TemplateError::InvalidId(
                "ID must be 1-64 characters".to_string(),
            ));
        }

        if !self.id.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_') {
            return Err(TemplateError::InvalidId(
                "ID must contain only alphanumeric, dash, or underscore".to_string(),
            ));
        }

        if self.name.is_empty() || self.name.len() > 256 {
            return Err(TemplateError::InvalidTemplate(
                "Name must be 1-256 characters".to_string(),
            ));
        }

        if self.content.is_empty() {
            return Err(TemplateError::InvalidTemplate(
                "Content must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Pick content for a locale: exact tag, then language, then default.
    pub fn content_for(&self, locale: &Locale) -> &str {
        self.translations
            .get(&locale.tag())
            .or_else(|| self.translations.get(locale.language()))
            .unwrap_or(&self.content)
    }
}

/// Request to update an existing template
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub content: Option<String>,
    pub translations: Option<HashMap<String, String>>,
    /// Use `Some(None)` to clear
    pub vendor_template_code: Option<Option<String>>,
    /// Use `Some(None)` to clear
    pub description: Option<Option<String>>,
}

/// Template text resolved for one send
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTemplate {
    pub content: String,
    pub vendor_template_code: Option<String>,
}

/// Source of template text for the dispatch pipeline
pub trait TemplateSource: Send + Sync {
    fn resolve(&self, template_id: &str, locale: &Locale) -> TemplateResult<ResolvedTemplate>;
}

/// In-memory template storage
pub struct TemplateStore {
    templates: DashMap<String, Template>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateStore {
    pub fn new() -> Self {
        Self {
            templates: DashMap::new(),
        }
    }

    /// Create a new template
    pub fn create(&self, template: Template) -> TemplateResult<Template> {
        template.validate()?;

        match self.templates.entry(template.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(TemplateError::AlreadyExists(template.id)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(template.clone());
                Ok(template)
            }
        }
    }

    pub fn get(&self, id: &str) -> TemplateResult<Template> {
        self.templates
            .get(id)
            .map(|t| t.clone())
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    pub fn list(&self) -> Vec<Template> {
        self.templates
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn update(&self, id: &str, updates: UpdateTemplateRequest) -> TemplateResult<Template> {
        let mut template = self.get(id)?;

        if let Some(name) = updates.name {
            template.name = name;
        }

        if let Some(content) = updates.content {
            template.content = content;
        }

        if let Some(translations) = updates.translations {
            template.translations = translations;
        }

        if let Some(code) = updates.vendor_template_code {
            template.vendor_template_code = code;
        }

        if let Some(description) = updates.description {
            template.description = description;
        }

        template.updated_at = Utc::now();
        template.validate()?;

        self.templates.insert(id.to_string(), template.clone());

        Ok(template)
    }

    pub fn delete(&self, id: &str) -> TemplateResult<()> {
        self.templates
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    pub fn exists(&self, id: &str) -> bool {
        self.templates.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.templates.len()
    }
}

impl TemplateSource for TemplateStore {
    fn resolve(&self, template_id: &str, locale: &Locale) -> TemplateResult<ResolvedTemplate> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| TemplateError::NotFound(template_id.to_string()))?;

        Ok(ResolvedTemplate {
            content: template.content_for(locale).to_string(),
            vendor_template_code: template.vendor_template_code.clone(),
        })
    }
}
