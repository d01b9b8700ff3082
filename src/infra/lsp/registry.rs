//! Dynamic capability registry
//!
//! Records `client/registerCapability` registrations by id. Events that depend
//! on a dynamically registered method are only sent while a matching
//! registration is present; a missing registration is never an error.

use std::collections::HashMap;

use tokio::sync::RwLock;

use super::protocol::{Registration, Unregistration};
use crate::models::DocumentSelector;

#[derive(Debug, Clone)]
struct Entry {
    registration: Registration,
    /// `None` applies the registration to every document
    selector: Option<DocumentSelector>,
}

impl Entry {
    fn new(registration: Registration) -> Self {
        let selector = registration
            .register_options
            .as_ref()
            .and_then(|options| options.get("documentSelector"))
            .and_then(DocumentSelector::from_value);
        Self {
            registration,
            selector,
        }
    }

    fn applies_to(&self, language_id: &str, uri: &str) -> bool {
        self.selector
            .as_ref()
            .is_none_or(|selector| selector.matches(language_id, uri))
    }
}

#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    entries: RwLock<HashMap<String, Entry>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record registrations. Re-using an id replaces the earlier entry.
    pub async fn register(&self, registrations: Vec<Registration>) {
        let mut entries = self.entries.write().await;
        for registration in registrations {
            tracing::debug!(
                "Registered capability {} ({})",
                registration.method,
                registration.id
            );
            entries.insert(registration.id.clone(), Entry::new(registration));
        }
    }

    /// Remove registrations by id. Unknown ids are ignored.
    pub async fn unregister(&self, unregistrations: &[Unregistration]) {
        let mut entries = self.entries.write().await;
        for unregistration in unregistrations {
            match entries.remove(&unregistration.id) {
                Some(entry) => tracing::debug!(
                    "Unregistered capability {} ({})",
                    entry.registration.method,
                    unregistration.id
                ),
                None => tracing::debug!(
                    "Ignoring unregistration of unknown id {} ({})",
                    unregistration.id,
                    unregistration.method
                ),
            }
        }
    }

    pub async fn is_registered(&self, method: &str) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|entry| entry.registration.method == method)
    }

    /// Whether `method` is registered for the given document
    pub async fn matches(&self, method: &str, language_id: &str, uri: &str) -> bool {
        self.entries
            .read()
            .await
            .values()
            .any(|entry| entry.registration.method == method && entry.applies_to(language_id, uri))
    }

    pub async fn registrations(&self) -> Vec<Registration> {
        let mut registrations: Vec<Registration> = self
            .entries
            .read()
            .await
            .values()
            .map(|entry| entry.registration.clone())
            .collect();
        registrations.sort_by(|a, b| a.id.cmp(&b.id));
        registrations
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
