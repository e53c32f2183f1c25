//! DRM registry: maps contact-string schemes to DRM factories.
//!
//! A contact string's scheme is the text before its first `:` (or the whole
//! string). `"slurm:gpu"` selects the `slurm` factory; the factory receives the
//! full contact string and the DRM validates the remainder on `connect`.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::drm::Drm;
use crate::error::{DrmError, DrmResult};

/// Factory function type for DRM implementations.
type DrmFactory = Box<dyn Fn(&str) -> DrmResult<Arc<dyn Drm>> + Send + Sync>;

/// Central registry of DRM implementations.
pub struct DrmRegistry {
    factories: FxHashMap<String, DrmFactory>,
    default_scheme: Option<String>,
}

impl DrmRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: FxHashMap::default(),
            default_scheme: None,
        }
    }

    /// Register a factory for a contact scheme.
    pub fn register_factory(
        &mut self,
        scheme: impl Into<String>,
        factory: impl Fn(&str) -> DrmResult<Arc<dyn Drm>> + Send + Sync + 'static,
    ) {
        let scheme = scheme.into();
        debug!("Registering DRM factory: {}", scheme);
        self.factories.insert(scheme, Box::new(factory));
    }

    /// Scheme used for an empty contact string.
    pub fn set_default(&mut self, scheme: impl Into<String>) {
        self.default_scheme = Some(scheme.into());
    }

    /// Extract the scheme of a contact string.
    pub fn scheme(contact: &str) -> &str {
        contact.split_once(':').map_or(contact, |(scheme, _)| scheme)
    }

    /// Create a DRM for a contact string.
    pub fn create(&self, contact: &str) -> DrmResult<Arc<dyn Drm>> {
        let scheme = match Self::scheme(contact.trim()) {
            "" => self
                .default_scheme
                .as_deref()
                .ok_or_else(|| DrmError::UnsupportedContact("<empty>".to_string()))?,
            scheme => scheme,
        };

        let factory = self.factories.get(scheme).ok_or_else(|| {
            DrmError::UnsupportedContact(format!(
                "no DRM registered for '{}' (available: {})",
                contact,
                self.available().join(", ")
            ))
        })?;
        factory(contact)
    }

    /// List registered schemes, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a scheme is registered.
    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }
}

impl Default for DrmRegistry {
    fn default() -> Self {
        Self::new()
    }
}
