//! Entry point the host drives with lifecycle and activation events.
//!
//! ```text
//! ExtensionsLoaded ──► any sibling active? ──yes──► PresenceEnsurer::ensure
//!                                         └─no───► CleanupCoordinator::run
//! SiblingActivated(s)   ──► PresenceEnsurer::ensure
//! SiblingDeactivated(s) ──► CleanupCoordinator::run
//! ```
//!
//! Every handler runs to completion inside the call and never returns a
//! host-fatal error.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::component::{
    CleanupCoordinator, CleanupDecision, ComponentRecord, ComponentStatus, EnsureOutcome,
    PresenceEnsurer, PresenceState, Trigger,
};
use crate::config::SuiteConfig;
use crate::error::{ActivationError, FetchError, RemovalError, StoreError};
use crate::host::{ActivationRegistry, SiblingSpec, StoreActivationRegistry};
use crate::menu::{MenuPass, MenuTree, SharedMenuRegistry, SubmenuDescriptor};
use crate::remote::{HttpFetcher, ProbeReport, RemoteFetcher, probe};
use crate::store::{JsonFileStore, Notice, StateStore};

/// Inbound events from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    ExtensionsLoaded,
    SiblingActivated(String),
    SiblingDeactivated(String),
}

/// What an event led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventOutcome {
    Ensured(EnsureOutcome),
    Cleanup(CleanupDecision),
    /// The event concerned an extension outside the sibling set.
    Ignored,
    /// Activation state could not be read; nothing was changed.
    Unavailable { reason: String },
}

impl std::fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ensured(outcome) => write!(f, "{outcome}"),
            Self::Cleanup(CleanupDecision::Keep) => write!(f, "kept"),
            Self::Cleanup(CleanupDecision::Retire) => write!(f, "retired"),
            Self::Ignored => write!(f, "ignored"),
            Self::Unavailable { reason } => write!(f, "unavailable: {reason}"),
        }
    }
}

pub struct Orchestrator {
    config: SuiteConfig,
    fetcher: Arc<dyn RemoteFetcher>,
    store: Arc<dyn StateStore>,
    host: Arc<dyn ActivationRegistry>,
    ensurer: PresenceEnsurer,
    cleanup: CleanupCoordinator,
    menu: SharedMenuRegistry,
}

impl Orchestrator {
    pub fn new(
        config: SuiteConfig,
        fetcher: Arc<dyn RemoteFetcher>,
        store: Arc<dyn StateStore>,
        host: Arc<dyn ActivationRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ensurer = PresenceEnsurer::new(
            &config,
            Arc::clone(&fetcher),
            Arc::clone(&store),
            Arc::clone(&host),
            clock,
        );
        let cleanup = CleanupCoordinator::new(
            &config.slug,
            config.siblings.clone(),
            ensurer.tree().clone(),
            config.locks_dir(),
            Arc::clone(&store),
            Arc::clone(&host),
        );
        let menu = SharedMenuRegistry::new(&config.menu_root_key, &config.title);
        Self {
            config,
            fetcher,
            store,
            host,
            ensurer,
            cleanup,
            menu,
        }
    }

    /// Wire the production stack: JSON state file, store-backed activation
    /// list, HTTP fetcher and the system clock.
    pub fn from_config(config: SuiteConfig) -> Result<Self, FetchError> {
        let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::open(config.state_path()));
        let host: Arc<dyn ActivationRegistry> =
            Arc::new(StoreActivationRegistry::new(Arc::clone(&store)));
        let fetcher: Arc<dyn RemoteFetcher> = Arc::new(HttpFetcher::new()?);
        Ok(Self::new(config, fetcher, store, host, Arc::new(SystemClock)))
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn host(&self) -> &dyn ActivationRegistry {
        self.host.as_ref()
    }

    pub async fn handle(&self, event: HostEvent) -> EventOutcome {
        match event {
            HostEvent::ExtensionsLoaded => self.on_lifecycle().await,
            HostEvent::SiblingActivated(slug) => self.on_sibling_activated(&slug).await,
            HostEvent::SiblingDeactivated(slug) => self.on_sibling_deactivated(&slug).await,
        }
    }

    /// "Extensions loaded": ensure the component while a sibling needs it,
    /// otherwise consider retiring it.
    pub async fn on_lifecycle(&self) -> EventOutcome {
        let siblings = match self.cleanup.observe_siblings() {
            Ok(siblings) => siblings,
            Err(e) => return unavailable(e),
        };
        if siblings.any_active() {
            EventOutcome::Ensured(self.ensurer.ensure(Trigger::Lifecycle).await)
        } else {
            self.run_cleanup()
        }
    }

    pub async fn on_sibling_activated(&self, slug: &str) -> EventOutcome {
        if !self.is_sibling(slug) {
            return EventOutcome::Ignored;
        }
        tracing::debug!(sibling = %slug, "Sibling activated");
        EventOutcome::Ensured(self.ensurer.ensure(Trigger::Lifecycle).await)
    }

    pub async fn on_sibling_deactivated(&self, slug: &str) -> EventOutcome {
        if !self.is_sibling(slug) {
            return EventOutcome::Ignored;
        }
        tracing::debug!(sibling = %slug, "Sibling deactivated");
        self.run_cleanup()
    }

    fn run_cleanup(&self) -> EventOutcome {
        match self.cleanup.run() {
            Ok(decision) => EventOutcome::Cleanup(decision),
            Err(e) => unavailable(e),
        }
    }

    fn is_sibling(&self, slug: &str) -> bool {
        self.config.siblings.iter().any(|s| s.slug == slug)
    }

    /// Read-only status, `None` when nothing is installed.
    pub fn status(&self) -> Result<Option<ComponentStatus>, StoreError> {
        Ok(ComponentRecord::load(self.store.as_ref(), &self.config.slug)?.map(|r| r.status()))
    }

    pub fn state(&self) -> PresenceState {
        self.ensurer.state()
    }

    pub fn active_siblings(&self) -> Result<Vec<SiblingSpec>, ActivationError> {
        let view = self.cleanup.observe_siblings()?;
        Ok(view.active().into_iter().cloned().collect())
    }

    /// Drain every pending notice.
    pub fn take_notices(&self) -> Result<Vec<Notice>, StoreError> {
        Notice::take_all(self.store.as_ref())
    }

    /// Operator-requested install. The result is never auto-retired.
    pub async fn install_manually(&self) -> EnsureOutcome {
        self.ensurer.ensure(Trigger::Manual).await
    }

    pub fn remove(&self) -> Result<(), RemovalError> {
        self.cleanup.remove()
    }

    /// Replace the installed tree with a fresh install, keeping whether the
    /// component may be auto-retired.
    pub async fn force_reinstall(&self) -> EnsureOutcome {
        let trigger = match ComponentRecord::load(self.store.as_ref(), &self.config.slug) {
            Ok(Some(record)) if !record.auto_generated => Trigger::Manual,
            Ok(_) => Trigger::Lifecycle,
            Err(e) => return e.into(),
        };
        self.ensurer.reinstall(trigger).await
    }

    pub async fn probe_remote(&self) -> ProbeReport {
        probe::probe(
            self.fetcher.as_ref(),
            &self.config.remote,
            self.ensurer.layout(),
            &self.config.components_dir(),
        )
        .await
    }

    pub fn menu_registry(&self) -> &SharedMenuRegistry {
        &self.menu
    }

    /// Run one menu pass with every active sibling attached under the shared root.
    pub fn build_menu(&self) -> Result<MenuTree, ActivationError> {
        let mut pass = MenuPass::new();
        self.menu.register(&mut pass);

        for sibling in self.active_siblings()? {
            let registry = self.menu.clone();
            pass.add(Box::new(move |tree| {
                let description = sibling.description.clone();
                let page = SubmenuDescriptor::new(
                    &sibling.name,
                    &sibling.slug,
                    Arc::new(move || description.clone()),
                );
                registry.attach(tree, &registry.handle(), page);
            }));
        }
        Ok(pass.run())
    }
}

fn unavailable(e: ActivationError) -> EventOutcome {
    tracing::warn!(error = %e, "Activation state unavailable");
    EventOutcome::Unavailable {
        reason: e.to_string(),
    }
}
