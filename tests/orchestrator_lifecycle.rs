//! End-to-end lifecycle tests.
//!
//! Drives the orchestrator through host events against an in-memory remote,
//! a JSON state file and a manual clock, and checks the on-disk tree, the
//! persisted record and the notices after each step.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;

use suite_core::clock::ManualClock;
use suite_core::component::{
    CleanupDecision, ComponentTree, EnsureOutcome, InstallLock, PresenceState, Source,
};
use suite_core::error::{FetchError, RemovalError};
use suite_core::host::{ActivationRegistry, StoreActivationRegistry};
use suite_core::remote::RemoteFetcher;
use suite_core::store::{JsonFileStore, Notice, StateStore, keys};
use suite_core::{EventOutcome, HostEvent, Orchestrator, SuiteConfig};

const BASE: &str = "https://remote.test/suite-core";

/// Remote serving whatever was last published. Unknown paths are 404.
#[derive(Default)]
struct FakeRemote {
    files: Mutex<HashMap<String, Result<Vec<u8>, u16>>>,
    calls: AtomicUsize,
}

impl FakeRemote {
    fn publish(&self, version: &str) {
        self.publish_split(version, version);
    }

    /// Publish a header declaring `header_version` and a `version.json`
    /// advertising `advertised`.
    fn publish_split(&self, header_version: &str, advertised: &str) {
        let mut files = self.files.lock().unwrap();
        files.insert(
            "suite-core.json".to_string(),
            Ok(format!(
                r#"{{"slug":"suite-core","name":"Suite Core","version":"{header_version}","menu_module":"includes/menu.json"}}"#
            )
            .into_bytes()),
        );
        files.insert(
            "includes/menu.json".to_string(),
            Ok(br#"{"root_key":"suite-plugins","title":"Suite Plugins"}"#.to_vec()),
        );
        files.insert("README.txt".to_string(), Ok(b"=== Suite Core ===".to_vec()));
        files.insert(
            "version.json".to_string(),
            Ok(format!(r#"{{"version":"{advertised}"}}"#).into_bytes()),
        );
    }

    fn fail(&self, path: &str, code: u16) {
        self.files.lock().unwrap().insert(path.to_string(), Err(code));
    }

    fn take_calls(&self) -> usize {
        self.calls.swap(0, Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteFetcher for FakeRemote {
    async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let path = url.strip_prefix(&format!("{BASE}/")).unwrap_or(url);
        match self.files.lock().unwrap().get(path) {
            Some(Ok(bytes)) => Ok(bytes.clone()),
            Some(Err(code)) => Err(FetchError::HttpStatus {
                url: url.to_string(),
                code: *code,
            }),
            None => Err(FetchError::HttpStatus {
                url: url.to_string(),
                code: 404,
            }),
        }
    }
}

struct Suite {
    dir: tempfile::TempDir,
    config: SuiteConfig,
    remote: Arc<FakeRemote>,
    store: Arc<JsonFileStore>,
    host: Arc<StoreActivationRegistry>,
    clock: Arc<ManualClock>,
    orchestrator: Orchestrator,
}

impl Suite {
    fn new(active_siblings: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SuiteConfig::with_home(dir.path().to_path_buf());
        config.remote.base_url = BASE.to_string();

        let store = Arc::new(JsonFileStore::open(config.state_path()));
        let host = Arc::new(StoreActivationRegistry::new(store.clone()));
        for slug in active_siblings {
            host.activate(slug).unwrap();
        }
        let remote = Arc::new(FakeRemote::default());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let orchestrator = Orchestrator::new(
            config.clone(),
            remote.clone(),
            store.clone(),
            host.clone(),
            clock.clone(),
        );
        Self {
            dir,
            config,
            remote,
            store,
            host,
            clock,
            orchestrator,
        }
    }

    fn tree(&self) -> ComponentTree {
        ComponentTree::new(self.config.components_dir(), "suite-core")
    }

    fn installed_version(&self) -> String {
        self.tree().verify().unwrap().version
    }

    fn component_active(&self) -> bool {
        self.host.is_active("suite-core").unwrap()
    }

    fn hours(&self, h: i64) {
        self.clock.advance(chrono::Duration::hours(h));
    }

    async fn lifecycle(&self) -> EventOutcome {
        self.orchestrator.handle(HostEvent::ExtensionsLoaded).await
    }
}

fn ensured(outcome: EventOutcome) -> EnsureOutcome {
    match outcome {
        EventOutcome::Ensured(outcome) => outcome,
        other => panic!("expected an ensure pass, got {other:?}"),
    }
}

fn component_dir_entries(suite: &Suite) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(suite.config.components_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn manifest_404_falls_back_to_local_copy() {
    let suite = Suite::new(&["post-gaps"]);

    let outcome = ensured(suite.lifecycle().await);

    assert_eq!(
        outcome,
        EnsureOutcome::Installed {
            source: Source::LocalFallback,
            version: "1.0.0".to_string()
        }
    );
    let status = suite.orchestrator.status().unwrap().unwrap();
    assert_eq!(status.source, Source::LocalFallback);
    assert!(status.auto_generated);
    assert!(suite.tree().verify().unwrap().generated_locally);
    assert!(suite.component_active());
}

#[tokio::test]
async fn recent_check_makes_no_network_call() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.0.0");
    ensured(suite.lifecycle().await);

    suite.hours(10);
    suite.remote.take_calls();
    let outcome = ensured(suite.lifecycle().await);

    assert_eq!(
        outcome,
        EnsureOutcome::CheckSkipped {
            version: "1.0.0".to_string()
        }
    );
    assert_eq!(suite.remote.take_calls(), 0);
}

#[tokio::test]
async fn older_remote_is_not_installed() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.0.1");
    ensured(suite.lifecycle().await);

    suite.remote.publish("1.0.0");
    suite.hours(25);
    let outcome = ensured(suite.lifecycle().await);

    assert_eq!(
        outcome,
        EnsureOutcome::UpToDate {
            version: "1.0.1".to_string()
        }
    );
    assert_eq!(suite.installed_version(), "1.0.1");
    // The check itself is recorded.
    let status = suite.orchestrator.status().unwrap().unwrap();
    assert_eq!(status.last_update_check, Some(suite.clock_now()));
}

impl Suite {
    fn clock_now(&self) -> chrono::DateTime<chrono::Utc> {
        use suite_core::clock::Clock;
        self.clock.now()
    }
}

#[tokio::test]
async fn newer_remote_is_backed_up_then_installed() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.0.0");
    ensured(suite.lifecycle().await);
    suite.orchestrator.take_notices().unwrap();

    suite.remote.publish("1.2.0");
    suite.hours(25);
    let outcome = ensured(suite.lifecycle().await);

    assert_eq!(
        outcome,
        EnsureOutcome::Updated {
            from: "1.0.0".to_string(),
            to: "1.2.0".to_string()
        }
    );
    assert_eq!(suite.installed_version(), "1.2.0");

    let backups: Vec<_> = std::fs::read_dir(suite.config.backups_dir())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(backups.len(), 1);
    let backed_up = std::fs::read_to_string(backups[0].join("suite-core.json")).unwrap();
    assert!(backed_up.contains("\"1.0.0\""));

    assert_eq!(
        suite.orchestrator.take_notices().unwrap(),
        vec![Notice::Updated {
            version: "1.2.0".to_string()
        }]
    );
    let status = suite.orchestrator.status().unwrap().unwrap();
    assert_eq!(status.version, "1.2.0");
    assert_eq!(status.source, Source::Remote);
}

#[tokio::test]
async fn advertised_version_never_downgrades_the_tree() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.2.0");
    ensured(suite.lifecycle().await);

    // version.json claims 1.3.0 but the files are still 1.1.0.
    suite.remote.publish_split("1.1.0", "1.3.0");
    suite.hours(25);
    let outcome = ensured(suite.lifecycle().await);

    assert!(
        matches!(outcome, EnsureOutcome::UpdateFailed { .. }),
        "got {outcome:?}"
    );
    assert_eq!(suite.installed_version(), "1.2.0");
    assert_eq!(
        suite.orchestrator.status().unwrap().unwrap().version,
        "1.2.0"
    );
}

#[tokio::test]
async fn partial_remote_install_is_never_committed() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.1.0");
    suite.remote.fail("README.txt", 500);

    let outcome = ensured(suite.lifecycle().await);

    // Remote files that did arrive are not mixed into the fallback tree.
    assert!(matches!(
        outcome,
        EnsureOutcome::Installed {
            source: Source::LocalFallback,
            ..
        }
    ));
    let header = suite.tree().verify().unwrap();
    assert!(header.generated_locally);
    assert_eq!(header.version, "1.0.0");
}

#[tokio::test]
async fn failed_update_leaves_installed_tree_untouched() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.0.0");
    ensured(suite.lifecycle().await);
    suite.orchestrator.take_notices().unwrap();

    suite.remote.publish("1.2.0");
    suite.remote.fail("includes/menu.json", 503);
    suite.hours(25);
    let outcome = ensured(suite.lifecycle().await);

    assert!(matches!(outcome, EnsureOutcome::UpdateFailed { .. }));
    assert_eq!(suite.installed_version(), "1.0.0");
    assert_eq!(
        suite.orchestrator.status().unwrap().unwrap().version,
        "1.0.0"
    );
    assert_eq!(
        suite.orchestrator.take_notices().unwrap(),
        vec![Notice::RemoteUnavailable]
    );
}

#[tokio::test]
async fn repeated_failed_updates_take_no_backups() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.0.0");
    ensured(suite.lifecycle().await);

    suite.remote.publish("1.2.0");
    suite.remote.fail("includes/menu.json", 503);
    for _ in 0..5 {
        suite.hours(25);
        let outcome = ensured(suite.lifecycle().await);
        assert!(matches!(outcome, EnsureOutcome::UpdateFailed { .. }));
    }

    // A header that is not actually newer is rejected before any backup too.
    suite.remote.publish_split("1.0.0", "1.2.0");
    suite.hours(25);
    let outcome = ensured(suite.lifecycle().await);
    assert!(matches!(outcome, EnsureOutcome::UpdateFailed { .. }));

    assert!(!suite.config.backups_dir().exists());
    assert_eq!(suite.installed_version(), "1.0.0");
}

#[tokio::test]
async fn backup_failure_aborts_update() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.0.0");
    ensured(suite.lifecycle().await);
    suite.orchestrator.take_notices().unwrap();

    // A plain file where the backups directory belongs.
    std::fs::write(suite.config.backups_dir(), "blocked").unwrap();
    suite.remote.publish("1.2.0");
    suite.hours(25);
    let outcome = ensured(suite.lifecycle().await);

    assert!(matches!(outcome, EnsureOutcome::UpdateFailed { .. }));
    assert_eq!(suite.installed_version(), "1.0.0");
    // The verified download was discarded with its staging directory.
    assert_eq!(component_dir_entries(&suite), vec!["suite-core".to_string()]);
    assert_eq!(
        suite.orchestrator.take_notices().unwrap(),
        vec![Notice::SyncFailed]
    );
}

#[tokio::test]
async fn last_sibling_leaving_retires_component() {
    let suite = Suite::new(&["post-gaps", "request-lister"]);
    suite.remote.publish("1.0.0");
    ensured(suite.lifecycle().await);
    suite.orchestrator.take_notices().unwrap();

    suite.host.deactivate("post-gaps").unwrap();
    assert_eq!(
        suite
            .orchestrator
            .handle(HostEvent::SiblingDeactivated("post-gaps".to_string()))
            .await,
        EventOutcome::Cleanup(CleanupDecision::Keep)
    );
    assert!(suite.component_active());

    suite.host.deactivate("request-lister").unwrap();
    assert_eq!(
        suite
            .orchestrator
            .on_sibling_deactivated("request-lister")
            .await,
        EventOutcome::Cleanup(CleanupDecision::Retire)
    );
    assert!(!suite.component_active());
    assert_eq!(suite.orchestrator.state(), PresenceState::Retired);
    // Files are kept.
    assert!(suite.tree().verify().is_ok());

    // The next lifecycle pass re-evaluates but does not repeat the notice.
    assert_eq!(
        suite.lifecycle().await,
        EventOutcome::Cleanup(CleanupDecision::Retire)
    );
    assert_eq!(
        suite.orchestrator.take_notices().unwrap(),
        vec![Notice::Retired]
    );

    // A sibling coming back reactivates the kept tree without reinstalling.
    suite.host.activate("post-gaps").unwrap();
    suite.remote.take_calls();
    let outcome = ensured(
        suite
            .orchestrator
            .on_sibling_activated("post-gaps")
            .await,
    );
    assert!(matches!(outcome, EnsureOutcome::CheckSkipped { .. }));
    assert!(suite.component_active());
    assert_eq!(suite.remote.take_calls(), 0);
}

#[tokio::test]
async fn manual_install_is_never_retired() {
    let suite = Suite::new(&[]);
    suite.remote.publish("1.0.0");

    let outcome = suite.orchestrator.install_manually().await;
    assert!(matches!(
        outcome,
        EnsureOutcome::Installed {
            source: Source::Remote,
            ..
        }
    ));
    assert!(!suite.orchestrator.status().unwrap().unwrap().auto_generated);

    assert_eq!(
        suite.lifecycle().await,
        EventOutcome::Cleanup(CleanupDecision::Keep)
    );
    assert!(suite.component_active());
}

#[tokio::test]
async fn removal_requires_no_active_siblings() {
    let suite = Suite::new(&["smart-tag-blocks"]);
    suite.remote.publish("1.0.0");
    ensured(suite.lifecycle().await);

    let err = suite.orchestrator.remove().unwrap_err();
    assert!(matches!(err, RemovalError::SiblingsActive { .. }));
    assert!(suite.tree().exists());

    suite.host.deactivate("smart-tag-blocks").unwrap();
    suite.orchestrator.remove().unwrap();

    assert!(!suite.tree().exists());
    assert!(!suite.component_active());
    assert!(suite.orchestrator.status().unwrap().is_none());
    assert!(suite.store.get(keys::VERSION).unwrap().is_none());
    assert!(suite.orchestrator.take_notices().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_remote_notice_is_raised_once() {
    let suite = Suite::new(&["post-gaps"]);
    ensured(suite.lifecycle().await);

    for _ in 0..3 {
        suite.hours(25);
        let outcome = ensured(suite.lifecycle().await);
        assert!(matches!(outcome, EnsureOutcome::CheckFailed { .. }));
    }

    let notices = suite.orchestrator.take_notices().unwrap();
    let unreachable = notices
        .iter()
        .filter(|n| **n == Notice::RemoteUnavailable)
        .count();
    assert_eq!(unreachable, 1);
    assert!(suite.orchestrator.take_notices().unwrap().is_empty());
}

#[tokio::test]
async fn fallback_is_replaced_once_remote_returns() {
    let suite = Suite::new(&["post-gaps"]);
    ensured(suite.lifecycle().await);

    suite.remote.publish("1.1.0");
    suite.hours(25);
    let outcome = ensured(suite.lifecycle().await);

    assert_eq!(
        outcome,
        EnsureOutcome::Updated {
            from: "1.0.0".to_string(),
            to: "1.1.0".to_string()
        }
    );
    let status = suite.orchestrator.status().unwrap().unwrap();
    assert_eq!(status.source, Source::Remote);
    assert!(status.auto_generated);
    assert!(!suite.tree().verify().unwrap().generated_locally);
}

#[tokio::test]
async fn fallback_is_replaced_by_remote_at_the_same_version() {
    let suite = Suite::new(&["post-gaps"]);
    ensured(suite.lifecycle().await);
    assert!(suite.tree().verify().unwrap().generated_locally);

    suite.remote.publish("1.0.0");
    suite.hours(25);
    let outcome = ensured(suite.lifecycle().await);

    assert_eq!(
        outcome,
        EnsureOutcome::Updated {
            from: "1.0.0".to_string(),
            to: "1.0.0".to_string()
        }
    );
    let status = suite.orchestrator.status().unwrap().unwrap();
    assert_eq!(status.source, Source::Remote);
    assert!(!suite.tree().verify().unwrap().generated_locally);

    // Now a remote install: the same version is no longer an update.
    suite.hours(25);
    assert_eq!(
        ensured(suite.lifecycle().await),
        EnsureOutcome::UpToDate {
            version: "1.0.0".to_string()
        }
    );
}

#[tokio::test]
async fn both_install_paths_failing_leaves_nothing_behind() {
    let suite = Suite::new(&["post-gaps"]);
    // Remote serves nothing, and a plain file blocks the components directory.
    std::fs::write(suite.config.components_dir(), "blocked").unwrap();

    let outcome = ensured(suite.lifecycle().await);

    assert!(
        matches!(outcome, EnsureOutcome::InstallFailed { .. }),
        "got {outcome:?}"
    );
    assert!(suite.orchestrator.status().unwrap().is_none());
    assert!(suite.store.get(keys::CREATED_LOCALLY).unwrap().is_none());
    assert!(!suite.tree().exists());
    assert!(!suite.component_active());
    assert_eq!(suite.orchestrator.state(), PresenceState::Absent);

    let notices = suite.orchestrator.take_notices().unwrap();
    assert!(notices.contains(&Notice::InstallFailed));
    assert!(!notices.contains(&Notice::Installed));
}

#[tokio::test]
async fn concurrent_install_is_single_flight() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.0.0");
    let _held = InstallLock::acquire(&suite.config.locks_dir(), "suite-core")
        .unwrap()
        .unwrap();

    assert_eq!(ensured(suite.lifecycle().await), EnsureOutcome::Busy);
    assert_eq!(suite.remote.take_calls(), 0);
    assert!(!suite.tree().exists());
}

#[tokio::test]
async fn state_survives_a_new_process() {
    let suite = Suite::new(&["post-gaps"]);
    suite.remote.publish("1.0.0");
    ensured(suite.lifecycle().await);

    let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::open(suite.config.state_path()));
    let reopened = Orchestrator::new(
        suite.config.clone(),
        suite.remote.clone(),
        store.clone(),
        Arc::new(StoreActivationRegistry::new(store)),
        suite.clock.clone(),
    );

    assert_eq!(
        reopened.state(),
        PresenceState::Installed(Source::Remote)
    );
    assert_eq!(reopened.status().unwrap().unwrap().version, "1.0.0");
    assert!(suite.dir.path().join("state.json").exists());
}

#[tokio::test]
async fn force_reinstall_keeps_retire_eligibility() {
    let suite = Suite::new(&["post-gaps"]);
    ensured(suite.lifecycle().await);
    suite.remote.publish("1.4.0");

    let outcome = suite.orchestrator.force_reinstall().await;

    assert_eq!(
        outcome,
        EnsureOutcome::Installed {
            source: Source::Remote,
            version: "1.4.0".to_string()
        }
    );
    assert!(suite.orchestrator.status().unwrap().unwrap().auto_generated);
    assert_eq!(std::fs::read_dir(suite.config.backups_dir()).unwrap().count(), 1);
}
