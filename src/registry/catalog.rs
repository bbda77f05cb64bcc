//! Type-keyed index of pluggable implementations.

use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{DispatchError, Result};

/// Something a `Catalog` can index: a channel sender factory or an SMS
/// sub-provider factory.
pub trait Discoverable: Send + Sync {
    /// Type identifier, e.g. `sms` or `aliyun`
    fn kind(&self) -> &str;

    /// Startup self-check. A failing probe keeps the candidate out of the catalog.
    fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// Lower-cased, trimmed type identifier used as the catalog key.
pub fn normalize_kind(kind: &str) -> String {
    kind.trim().to_ascii_lowercase()
}

/// Concurrent map from type identifier to implementation.
pub struct Catalog<F: ?Sized> {
    /// Human-readable name for logs (`channel`, `sms provider`)
    label: &'static str,
    entries: DashMap<String, Arc<F>>,
}

impl<F: Discoverable + ?Sized> Catalog<F> {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            entries: DashMap::new(),
        }
    }

    /// Index an explicit list of candidates.
    ///
    /// Candidates whose probe fails, or whose kind is blank or already taken,
    /// are logged and skipped. Returns how many were indexed.
    pub fn discover<I>(&self, candidates: I) -> usize
    where
        I: IntoIterator<Item = Arc<F>>,
    {
        let mut indexed = 0;

        for candidate in candidates {
            let kind = normalize_kind(candidate.kind());

            if kind.is_empty() {
                tracing::warn!(catalog = self.label, "Skipping candidate with empty type identifier");
                continue;
            }

            if let Err(e) = candidate.probe() {
                tracing::warn!(
                    catalog = self.label,
                    kind = %kind,
                    error = %e,
                    "Skipping candidate that failed its probe"
                );
                continue;
            }

            match self.entries.entry(kind.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    tracing::warn!(
                        catalog = self.label,
                        kind = %kind,
                        "Duplicate type identifier, keeping the first implementation"
                    );
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(candidate);
                    indexed += 1;
                    tracing::debug!(catalog = self.label, kind = %kind, "Implementation discovered");
                }
            }
        }

        tracing::info!(catalog = self.label, indexed, total = self.entries.len(), "Discovery complete");
        indexed
    }

    /// Install or replace the implementation for `kind`, returning the previous one.
    pub fn register(&self, kind: &str, implementation: Arc<F>) -> Result<Option<Arc<F>>> {
        let kind = normalize_kind(kind);
        if kind.is_empty() {
            return Err(DispatchError::Configuration(format!(
                "{} type identifier must not be empty",
                self.label
            )));
        }

        let previous = self.entries.insert(kind.clone(), implementation);
        tracing::info!(
            catalog = self.label,
            kind = %kind,
            replaced = previous.is_some(),
            "Implementation registered"
        );
        Ok(previous)
    }

    pub fn get(&self, kind: &str) -> Option<Arc<F>> {
        self.entries
            .get(&normalize_kind(kind))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.contains_key(&normalize_kind(kind))
    }

    /// Registered type identifiers, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        kinds.sort();
        kinds
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
