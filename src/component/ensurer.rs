//! Keeps the shared component installed, active and reasonably current.
//!
//! ```text
//!  Absent ──► Installing ──► Installed(Remote | LocalFallback | Unknown)
//!                 │                 │        ▲
//!                 │ remote failed   ▼        │ all-or-nothing swap
//!                 ▼             Updating ────┘
//!          fallback synthesis
//!                                   Installed ──(cleanup)──► Retired
//! ```
//!
//! Every attempt is non-fatal: failures become an [`EnsureOutcome`] plus a
//! deduplicated [`Notice`], and the previous tree is left untouched.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::component::backup::BackupManager;
use crate::component::fallback::FallbackSynthesizer;
use crate::component::lock::InstallLock;
use crate::component::record::{ComponentRecord, Source};
use crate::component::tree::{ComponentHeader, ComponentTree, StagedTree, verify_dir};
use crate::component::version::{VersionOrdering, VersionPoller};
use crate::config::{RemoteConfig, SuiteConfig};
use crate::error::{FetchError, InstallError, StoreError, TreeError};
use crate::host::ActivationRegistry;
use crate::remote::{RemoteFetcher, RemoteLayout, RemoteVersion};
use crate::store::{Notice, StateStore};

/// What started an ensure pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Host "extensions loaded" event. Installs made here may be auto-retired.
    Lifecycle,
    /// Operator request. Installs made here are never auto-retired.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "source", rename_all = "snake_case")]
pub enum PresenceState {
    Absent,
    Installing,
    Installed(Source),
    Updating(Source),
    /// Installed on disk but deactivated.
    Retired,
}

/// Result of one ensure pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EnsureOutcome {
    Installed { source: Source, version: String },
    /// An untracked tree on disk was taken over.
    Adopted { version: String },
    Updated { from: String, to: String },
    UpToDate { version: String },
    /// Installed, and the version check is not due yet.
    CheckSkipped { version: String },
    /// The remote version could not be determined.
    CheckFailed { reason: String },
    /// A newer version exists but could not be applied.
    UpdateFailed { reason: String },
    /// Neither the remote nor the fallback produced a component.
    InstallFailed { reason: String },
    /// Another install or update holds the lock.
    Busy,
    StateUnavailable { reason: String },
}

impl std::fmt::Display for EnsureOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Installed { source, version } => write!(f, "installed {version} ({source})"),
            Self::Adopted { version } => write!(f, "adopted existing tree at {version}"),
            Self::Updated { from, to } => write!(f, "updated {from} -> {to}"),
            Self::UpToDate { version } => write!(f, "up to date at {version}"),
            Self::CheckSkipped { version } => write!(f, "installed at {version}, check not due"),
            Self::CheckFailed { reason } => write!(f, "version check failed: {reason}"),
            Self::UpdateFailed { reason } => write!(f, "update failed: {reason}"),
            Self::InstallFailed { reason } => write!(f, "install failed: {reason}"),
            Self::Busy => write!(f, "another install is in progress"),
            Self::StateUnavailable { reason } => write!(f, "state unavailable: {reason}"),
        }
    }
}

impl From<StoreError> for EnsureOutcome {
    fn from(e: StoreError) -> Self {
        Self::StateUnavailable {
            reason: e.to_string(),
        }
    }
}

/// Marks an in-flight transition; cleared when dropped.
struct Transition<'a> {
    slot: &'a Mutex<Option<PresenceState>>,
}

impl<'a> Transition<'a> {
    fn enter(slot: &'a Mutex<Option<PresenceState>>, state: PresenceState) -> Self {
        if let Ok(mut current) = slot.lock() {
            *current = Some(state);
        }
        Self { slot }
    }
}

impl Drop for Transition<'_> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.slot.lock() {
            *current = None;
        }
    }
}

/// Whether a remote `version` may take over from `record`. A remote install
/// needs a strictly newer version; a fallback or adopted tree is replaced by
/// anything at least as new.
fn replaces(record: &ComponentRecord, version: &str) -> bool {
    match record.source {
        Source::Remote => {
            VersionPoller::compare(version, &record.installed_version) == VersionOrdering::Newer
        }
        Source::LocalFallback | Source::Unknown => {
            VersionPoller::at_least(version, &record.installed_version)
        }
    }
}

pub struct PresenceEnsurer {
    slug: String,
    tree: ComponentTree,
    layout: RemoteLayout,
    remote: RemoteConfig,
    poller: VersionPoller,
    backups: BackupManager,
    synthesizer: FallbackSynthesizer,
    locks_dir: PathBuf,
    fetcher: Arc<dyn RemoteFetcher>,
    store: Arc<dyn StateStore>,
    host: Arc<dyn ActivationRegistry>,
    clock: Arc<dyn Clock>,
    transition: Mutex<Option<PresenceState>>,
}

impl PresenceEnsurer {
    pub fn new(
        config: &SuiteConfig,
        fetcher: Arc<dyn RemoteFetcher>,
        store: Arc<dyn StateStore>,
        host: Arc<dyn ActivationRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            slug: config.slug.clone(),
            tree: ComponentTree::new(config.components_dir(), &config.slug),
            layout: RemoteLayout::for_slug(&config.slug),
            remote: config.remote.clone(),
            poller: VersionPoller::new(config.sync.check_interval),
            backups: BackupManager::new(config.backups_dir(), config.sync.keep_backups),
            synthesizer: FallbackSynthesizer::new(
                &config.slug,
                &config.title,
                &config.menu_root_key,
            ),
            locks_dir: config.locks_dir(),
            fetcher,
            store,
            host,
            clock,
            transition: Mutex::new(None),
        }
    }

    pub fn tree(&self) -> &ComponentTree {
        &self.tree
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    /// Current lifecycle state, derived from the record and the host.
    pub fn state(&self) -> PresenceState {
        if let Ok(current) = self.transition.lock()
            && let Some(state) = *current
        {
            return state;
        }
        match ComponentRecord::load(self.store.as_ref(), &self.slug) {
            Ok(Some(record)) => match self.host.is_active(&self.slug) {
                Ok(false) => PresenceState::Retired,
                _ => PresenceState::Installed(record.source),
            },
            _ => PresenceState::Absent,
        }
    }

    /// Make sure the component is installed and active, updating it when a
    /// check is due and the remote version may replace the installed tree.
    pub async fn ensure(&self, trigger: Trigger) -> EnsureOutcome {
        let record = match ComponentRecord::load(self.store.as_ref(), &self.slug) {
            Ok(record) => record,
            Err(e) => return e.into(),
        };

        let Some(mut record) = record else {
            return self.install_untracked(trigger).await;
        };

        if let Err(e) = self.tree.verify() {
            tracing::warn!(slug = %self.slug, error = %e, "Recorded component tree is not loadable");
            return self
                .with_lock(|lock| self.install_fresh(trigger, Some(&record), lock))
                .await;
        }

        if trigger == Trigger::Manual && record.auto_generated {
            record.auto_generated = false;
            if let Err(e) = record.save(self.store.as_ref()) {
                return e.into();
            }
        }

        self.ensure_active();
        self.maybe_update(record).await
    }

    /// Drop the current tree and record and install from scratch.
    pub async fn reinstall(&self, trigger: Trigger) -> EnsureOutcome {
        self.with_lock(|lock| async move {
            if self.tree.exists() {
                if let Err(e) = self.backups.snapshot(&self.tree.path(), self.clock.now()) {
                    tracing::warn!(slug = %self.slug, error = %e, "Reinstall aborted: backup failed");
                    return EnsureOutcome::InstallFailed {
                        reason: e.to_string(),
                    };
                }
                if let Err(e) = self.tree.remove() {
                    return EnsureOutcome::InstallFailed {
                        reason: format!("failed to remove {}: {e}", self.tree.path().display()),
                    };
                }
            }
            if let Err(e) = ComponentRecord::clear(self.store.as_ref()) {
                return e.into();
            }
            tracing::info!(slug = %self.slug, "Reinstalling component");
            self.install_fresh(trigger, None, lock).await
        })
        .await
    }

    async fn with_lock<'a, F, Fut>(&'a self, f: F) -> EnsureOutcome
    where
        F: FnOnce(InstallLock) -> Fut,
        Fut: std::future::Future<Output = EnsureOutcome> + 'a,
    {
        match InstallLock::acquire(&self.locks_dir, &self.slug) {
            Ok(Some(lock)) => f(lock).await,
            Ok(None) => {
                tracing::info!(slug = %self.slug, "Install already in progress, skipping");
                EnsureOutcome::Busy
            }
            Err(e) => EnsureOutcome::InstallFailed {
                reason: format!("failed to take install lock: {e}"),
            },
        }
    }

    /// No record: adopt a loadable tree, otherwise back up any leftovers and install.
    async fn install_untracked(&self, trigger: Trigger) -> EnsureOutcome {
        self.with_lock(|lock| async move {
            // Another process may have finished while we waited for the lock.
            match ComponentRecord::load(self.store.as_ref(), &self.slug) {
                Ok(Some(record)) if self.tree.verify().is_ok() => {
                    return EnsureOutcome::UpToDate {
                        version: record.installed_version,
                    };
                }
                Ok(_) => {}
                Err(e) => return e.into(),
            }

            if self.tree.exists() {
                match self.tree.verify() {
                    Ok(header) => return self.adopt(header),
                    Err(e) => {
                        tracing::warn!(
                            slug = %self.slug,
                            error = %e,
                            "Replacing unloadable untracked tree"
                        );
                        if let Err(e) =
                            self.backups.snapshot(&self.tree.path(), self.clock.now())
                        {
                            self.notify(Notice::InstallFailed);
                            return EnsureOutcome::InstallFailed {
                                reason: e.to_string(),
                            };
                        }
                    }
                }
            }

            self.install_fresh(trigger, None, lock).await
        })
        .await
    }

    fn adopt(&self, header: ComponentHeader) -> EnsureOutcome {
        let now = self.clock.now();
        let mut record = ComponentRecord::new(&self.slug, &header.version, Source::Unknown, now);
        record.auto_generated = false;
        // Never checked by us; the next pass consults the remote.
        record.last_update_check = None;
        if let Err(e) = record.save(self.store.as_ref()) {
            return e.into();
        }
        tracing::info!(slug = %self.slug, version = %header.version, "Adopted existing component tree");
        self.ensure_active();
        EnsureOutcome::Adopted {
            version: header.version,
        }
    }

    /// Remote install with fallback synthesis. Caller holds the lock.
    async fn install_fresh(
        &self,
        trigger: Trigger,
        previous: Option<&ComponentRecord>,
        _lock: InstallLock,
    ) -> EnsureOutcome {
        let _transition = Transition::enter(&self.transition, PresenceState::Installing);
        let now = self.clock.now();

        let remote = match self.prepare_remote(None).await {
            Ok((staged, header)) => self.commit(staged).map(|()| header),
            Err(e) => Err(e),
        };
        let (source, header) = match remote {
            Ok(header) => (Source::Remote, header),
            Err(e) => {
                tracing::warn!(slug = %self.slug, error = %e, "Remote install failed, synthesizing locally");
                if matches!(e, InstallError::Fetch(_)) {
                    self.notify(Notice::RemoteUnavailable);
                }
                match self.synthesizer.synthesize(&self.tree) {
                    Ok(header) => (Source::LocalFallback, header),
                    Err(se) => {
                        tracing::error!(slug = %self.slug, error = %se, "Fallback synthesis failed");
                        self.notify(Notice::InstallFailed);
                        return EnsureOutcome::InstallFailed {
                            reason: format!("remote: {e}; fallback: {se}"),
                        };
                    }
                }
            }
        };

        let mut record = ComponentRecord::new(&self.slug, &header.version, source, now);
        record.auto_generated = trigger == Trigger::Lifecycle;
        if let Some(previous) = previous {
            record.installed_at = previous.installed_at;
            record.auto_generated = record.auto_generated && previous.auto_generated;
        }
        if let Err(e) = record.save(self.store.as_ref()) {
            return e.into();
        }

        self.dismiss(Notice::InstallFailed);
        if source == Source::Remote {
            self.dismiss(Notice::RemoteUnavailable);
        }
        self.notify(Notice::Installed);

        tracing::info!(slug = %self.slug, version = %header.version, source = %source, "Component installed");
        self.ensure_active();
        EnsureOutcome::Installed {
            source,
            version: header.version,
        }
    }

    async fn maybe_update(&self, record: ComponentRecord) -> EnsureOutcome {
        let now = self.clock.now();
        if !self.poller.should_check(record.last_update_check, now) {
            return EnsureOutcome::CheckSkipped {
                version: record.installed_version,
            };
        }
        if let Err(e) = ComponentRecord::record_check(self.store.as_ref(), now) {
            return e.into();
        }

        let remote_version = match self.remote_version().await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(slug = %self.slug, error = %e, "Remote version check failed");
                self.notify(Notice::RemoteUnavailable);
                return EnsureOutcome::CheckFailed {
                    reason: e.to_string(),
                };
            }
        };

        if !replaces(&record, &remote_version) {
            tracing::debug!(
                slug = %self.slug,
                installed = %record.installed_version,
                remote = %remote_version,
                "Component is current"
            );
            self.dismiss(Notice::RemoteUnavailable);
            return EnsureOutcome::UpToDate {
                version: record.installed_version,
            };
        }

        self.with_lock(|lock| self.update(remote_version, now, lock)).await
    }

    /// Download `advertised`, back up the live tree and swap the download in.
    /// Caller holds the lock.
    async fn update(
        &self,
        advertised: String,
        now: DateTime<Utc>,
        _lock: InstallLock,
    ) -> EnsureOutcome {
        // The record may have moved on while we waited for the lock.
        let record = match ComponentRecord::load(self.store.as_ref(), &self.slug) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return EnsureOutcome::CheckFailed {
                    reason: "component record was removed during the check".to_string(),
                };
            }
            Err(e) => return e.into(),
        };
        if !replaces(&record, &advertised) {
            tracing::debug!(slug = %self.slug, version = %record.installed_version, "Update already applied");
            return EnsureOutcome::UpToDate {
                version: record.installed_version,
            };
        }

        let _transition =
            Transition::enter(&self.transition, PresenceState::Updating(record.source));

        let (staged, header) = match self.prepare_remote(Some(&record)).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::warn!(slug = %self.slug, error = %e, "Update failed, keeping installed tree");
                self.notify(match &e {
                    InstallError::Fetch(_) => Notice::RemoteUnavailable,
                    _ => Notice::SyncFailed,
                });
                return EnsureOutcome::UpdateFailed {
                    reason: e.to_string(),
                };
            }
        };

        if let Err(e) = self.backups.snapshot(&self.tree.path(), now) {
            tracing::warn!(slug = %self.slug, error = %e, "Update aborted: backup failed");
            self.notify(Notice::SyncFailed);
            return EnsureOutcome::UpdateFailed {
                reason: e.to_string(),
            };
        }

        if let Err(e) = self.commit(staged) {
            tracing::warn!(slug = %self.slug, error = %e, "Update failed, keeping installed tree");
            self.notify(Notice::SyncFailed);
            return EnsureOutcome::UpdateFailed {
                reason: e.to_string(),
            };
        }

        let from = record.installed_version.clone();
        let updated = ComponentRecord {
            installed_version: header.version.clone(),
            source: Source::Remote,
            last_update_check: Some(now),
            ..record
        };
        if let Err(e) = updated.save(self.store.as_ref()) {
            return e.into();
        }

        self.dismiss(Notice::RemoteUnavailable);
        self.dismiss(Notice::SyncFailed);
        self.notify(Notice::Updated {
            version: header.version.clone(),
        });

        tracing::info!(slug = %self.slug, from = %from, to = %header.version, "Component updated");
        self.ensure_active();
        EnsureOutcome::Updated {
            from,
            to: header.version,
        }
    }

    /// Version advertised by the remote: `version.json` when published,
    /// otherwise the component header.
    async fn remote_version(&self) -> Result<String, InstallError> {
        if let Some(path) = self.layout.version.as_deref() {
            match self.fetch(path).await {
                Ok(bytes) => {
                    if let Some(version) = RemoteVersion::parse(&bytes) {
                        return Ok(version);
                    }
                }
                Err(FetchError::HttpStatus { code: 404, .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        let bytes = self.fetch(&self.layout.entry).await?;
        let header: ComponentHeader = serde_json::from_slice(&bytes).map_err(|e| {
            InstallError::InvalidTree(TreeError::Malformed {
                path: self.layout.entry.clone().into(),
                reason: e.to_string(),
            })
        })?;
        Ok(header.version)
    }

    async fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        let url = self.remote.url_for(path);
        self.fetcher.fetch(&url, self.remote.timeout).await
    }

    /// Fetch every required file into a staging tree and verify it. The live
    /// tree is not touched.
    ///
    /// With `replacing`, the downloaded header must be allowed to take over
    /// from that record.
    async fn prepare_remote(
        &self,
        replacing: Option<&ComponentRecord>,
    ) -> Result<(StagedTree, ComponentHeader), InstallError> {
        let mut files = Vec::with_capacity(3);
        for path in self.layout.required() {
            let bytes = self.fetch(path).await?;
            files.push((path.to_string(), bytes));
        }

        let fs_err = |path: PathBuf, e: std::io::Error| InstallError::Filesystem {
            path,
            reason: e.to_string(),
        };
        let staged = self
            .tree
            .stage()
            .map_err(|e| fs_err(self.tree.components_dir().to_path_buf(), e))?;
        for (rel, bytes) in &files {
            staged
                .write(rel, bytes)
                .map_err(|e| fs_err(staged.root().join(rel), e))?;
        }

        let header = verify_dir(staged.root(), &self.slug)?;
        if let Some(record) = replacing
            && !replaces(record, &header.version)
        {
            return Err(InstallError::NotNewer {
                found: header.version,
                installed: record.installed_version.clone(),
            });
        }
        Ok((staged, header))
    }

    fn commit(&self, staged: StagedTree) -> Result<(), InstallError> {
        self.tree
            .commit(staged)
            .map_err(|e| InstallError::Filesystem {
                path: self.tree.path(),
                reason: e.to_string(),
            })
    }

    fn notify(&self, notice: Notice) {
        if let Err(e) = notice.raise(self.store.as_ref()) {
            tracing::warn!(slug = %self.slug, notice = notice.key(), error = %e, "Failed to raise notice");
        }
    }

    fn dismiss(&self, notice: Notice) {
        if let Err(e) = notice.clear(self.store.as_ref()) {
            tracing::warn!(slug = %self.slug, notice = notice.key(), error = %e, "Failed to clear notice");
        }
    }

    fn ensure_active(&self) {
        match self.host.is_active(&self.slug) {
            Ok(true) => {}
            Ok(false) => match self.host.activate(&self.slug) {
                Ok(()) => tracing::info!(slug = %self.slug, "Activated component"),
                Err(e) => tracing::warn!(slug = %self.slug, error = %e, "Failed to activate component"),
            },
            Err(e) => tracing::warn!(slug = %self.slug, error = %e, "Failed to read activation state"),
        }
    }
}
