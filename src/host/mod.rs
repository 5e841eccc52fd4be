//! Host activation surface and the sibling view derived from it.
//!
//! The host owns the list of active extensions. The orchestrator only asks
//! "is X active" and requests activation changes for the shared component;
//! the sibling view is rebuilt from the host on every evaluation and never
//! cached.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;

use crate::error::ActivationError;
use crate::store::{StateStore, keys};

/// Read/write activation surface provided by the host.
pub trait ActivationRegistry: Send + Sync {
    fn is_active(&self, slug: &str) -> Result<bool, ActivationError>;

    /// Activate `slug`. Activating an active component is a no-op.
    fn activate(&self, slug: &str) -> Result<(), ActivationError>;

    /// Deactivate `slug`. Deactivating an inactive component is a no-op.
    fn deactivate(&self, slug: &str) -> Result<(), ActivationError>;
}

/// A dependent extension from the fixed sibling set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiblingSpec {
    pub slug: String,
    pub name: String,
    pub description: String,
}

impl SiblingSpec {
    pub fn new(slug: &str, name: &str, description: &str) -> Self {
        Self {
            slug: slug.to_string(),
            name: name.to_string(),
            description: description.to_string(),
        }
    }

    /// The sibling set shipped with the suite.
    pub fn default_set() -> Vec<Self> {
        vec![
            Self::new(
                "post-gaps",
                "Post Gaps",
                "Identifies gaps in the posting schedule with calendar and list views.",
            ),
            Self::new(
                "request-lister",
                "Request Lister",
                "Lists and manages incoming requests.",
            ),
            Self::new(
                "smart-tag-blocks",
                "Smart Tag Blocks",
                "Tag management with block-level features.",
            ),
            Self::new(
                "secure-file-download",
                "Secure File Download",
                "File download management with access controls.",
            ),
        ]
    }
}

/// Point-in-time view of which siblings are active.
#[derive(Debug, Clone)]
pub struct SiblingRegistry {
    entries: Vec<(SiblingSpec, bool)>,
}

impl SiblingRegistry {
    /// Query the host for every known sibling.
    pub fn observe(
        host: &dyn ActivationRegistry,
        siblings: &[SiblingSpec],
    ) -> Result<Self, ActivationError> {
        let mut entries = Vec::with_capacity(siblings.len());
        for spec in siblings {
            let active = host.is_active(&spec.slug)?;
            entries.push((spec.clone(), active));
        }
        Ok(Self { entries })
    }

    /// Build a view from explicit states.
    pub fn from_states(entries: Vec<(SiblingSpec, bool)>) -> Self {
        Self { entries }
    }

    pub fn any_active(&self) -> bool {
        self.entries.iter().any(|(_, active)| *active)
    }

    pub fn is_active(&self, slug: &str) -> bool {
        self.entries
            .iter()
            .any(|(spec, active)| *active && spec.slug == slug)
    }

    /// Active siblings in declaration order.
    pub fn active(&self) -> Vec<&SiblingSpec> {
        self.entries
            .iter()
            .filter(|(_, active)| *active)
            .map(|(spec, _)| spec)
            .collect()
    }
}

/// Activation list persisted in the state store under `activeComponents`.
pub struct StoreActivationRegistry {
    store: Arc<dyn StateStore>,
}

impl StoreActivationRegistry {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn load(&self) -> Result<BTreeSet<String>, ActivationError> {
        let list = self
            .store
            .get(keys::ACTIVE_COMPONENTS)?
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();
        Ok(list
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect())
    }

    fn save(&self, active: &BTreeSet<String>) -> Result<(), ActivationError> {
        self.store
            .set(keys::ACTIVE_COMPONENTS, json!(active.iter().collect::<Vec<_>>()))?;
        Ok(())
    }
}

impl ActivationRegistry for StoreActivationRegistry {
    fn is_active(&self, slug: &str) -> Result<bool, ActivationError> {
        Ok(self.load()?.contains(slug))
    }

    fn activate(&self, slug: &str) -> Result<(), ActivationError> {
        let mut active = self.load()?;
        if active.insert(slug.to_string()) {
            self.save(&active)?;
        }
        Ok(())
    }

    fn deactivate(&self, slug: &str) -> Result<(), ActivationError> {
        let mut active = self.load()?;
        if active.remove(slug) {
            self.save(&active)?;
        }
        Ok(())
    }
}

/// In-memory activation list.
#[derive(Debug, Default)]
pub struct MemoryActivationRegistry {
    active: Mutex<BTreeSet<String>>,
}

impl MemoryActivationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_active(slugs: &[&str]) -> Self {
        Self {
            active: Mutex::new(slugs.iter().map(|s| s.to_string()).collect()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeSet<String>>, ActivationError> {
        self.active.lock().map_err(|_| ActivationError::Host {
            slug: String::new(),
            reason: "activation mutex poisoned".to_string(),
        })
    }
}

impl ActivationRegistry for MemoryActivationRegistry {
    fn is_active(&self, slug: &str) -> Result<bool, ActivationError> {
        Ok(self.lock()?.contains(slug))
    }

    fn activate(&self, slug: &str) -> Result<(), ActivationError> {
        self.lock()?.insert(slug.to_string());
        Ok(())
    }

    fn deactivate(&self, slug: &str) -> Result<(), ActivationError> {
        self.lock()?.remove(slug);
        Ok(())
    }
}
