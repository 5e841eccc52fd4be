//! Retirement and removal of the shared component once no sibling needs it.

use std::path::PathBuf;
use std::sync::Arc;

use crate::component::lock::InstallLock;
use crate::component::record::ComponentRecord;
use crate::component::tree::ComponentTree;
use crate::error::{ActivationError, RemovalError};
use crate::host::{ActivationRegistry, SiblingRegistry, SiblingSpec};
use crate::store::{Notice, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupDecision {
    Keep,
    Retire,
}

pub struct CleanupCoordinator {
    slug: String,
    siblings: Vec<SiblingSpec>,
    tree: ComponentTree,
    locks_dir: PathBuf,
    store: Arc<dyn StateStore>,
    host: Arc<dyn ActivationRegistry>,
}

impl CleanupCoordinator {
    pub fn new(
        slug: &str,
        siblings: Vec<SiblingSpec>,
        tree: ComponentTree,
        locks_dir: PathBuf,
        store: Arc<dyn StateStore>,
        host: Arc<dyn ActivationRegistry>,
    ) -> Self {
        Self {
            slug: slug.to_string(),
            siblings,
            tree,
            locks_dir,
            store,
            host,
        }
    }

    /// Retire only a component we installed ourselves, and only when no
    /// known sibling is active.
    pub fn evaluate(siblings: &SiblingRegistry, record: Option<&ComponentRecord>) -> CleanupDecision {
        match record {
            Some(record) if record.auto_generated && !siblings.any_active() => {
                CleanupDecision::Retire
            }
            _ => CleanupDecision::Keep,
        }
    }

    pub fn observe_siblings(&self) -> Result<SiblingRegistry, ActivationError> {
        SiblingRegistry::observe(self.host.as_ref(), &self.siblings)
    }

    /// Evaluate against the live host and deactivate on `Retire`.
    ///
    /// Files and the record are kept; the retire notice is raised only when
    /// the component was actually active.
    pub fn run(&self) -> Result<CleanupDecision, ActivationError> {
        let siblings = self.observe_siblings()?;
        let record = ComponentRecord::load(self.store.as_ref(), &self.slug)?;
        let decision = Self::evaluate(&siblings, record.as_ref());

        if decision == CleanupDecision::Retire && self.host.is_active(&self.slug)? {
            self.host.deactivate(&self.slug)?;
            Notice::Retired.raise(self.store.as_ref())?;
            tracing::info!(slug = %self.slug, "Retired component: no sibling is active");
        }
        Ok(decision)
    }

    /// Deactivate, delete the tree, and forget every record key and notice.
    pub fn remove(&self) -> Result<(), RemovalError> {
        let _lock = InstallLock::acquire(&self.locks_dir, &self.slug)
            .map_err(|e| RemovalError::Delete {
                path: self.locks_dir.clone(),
                reason: e.to_string(),
            })?
            .ok_or_else(|| RemovalError::Busy {
                slug: self.slug.clone(),
            })?;

        let siblings = self.observe_siblings()?;
        if siblings.any_active() {
            let active = siblings
                .active()
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(RemovalError::SiblingsActive {
                slug: self.slug.clone(),
                active,
            });
        }

        self.host.deactivate(&self.slug)?;
        self.tree.remove().map_err(|e| RemovalError::Delete {
            path: self.tree.path(),
            reason: e.to_string(),
        })?;

        let store = self.store.as_ref();
        ComponentRecord::clear(store)?;
        store.apply(Vec::new(), Notice::KEYS)?;

        tracing::info!(slug = %self.slug, "Removed component");
        Ok(())
    }
}
