//! The shared component: its persisted record, on-disk tree, and the
//! installers that keep it present, current and retired when unused.

mod backup;
mod cleanup;
mod ensurer;
mod fallback;
mod lock;
mod record;
mod tree;
mod version;

pub use backup::BackupManager;
pub use cleanup::{CleanupCoordinator, CleanupDecision};
pub use ensurer::{EnsureOutcome, PresenceEnsurer, PresenceState, Trigger};
pub use fallback::{FALLBACK_VERSION, FallbackSynthesizer};
pub use lock::InstallLock;
pub use record::{ComponentRecord, ComponentStatus, Source};
pub use tree::{ComponentHeader, ComponentTree, MenuModule, StagedTree, verify_dir};
pub use version::{MalformedVersion, VersionOrdering, VersionPoller, parse_version};
