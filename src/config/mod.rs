//! Environment-driven configuration.
//!
//! Every key is optional. Defaults reproduce the reference deployment: a
//! 30 second fetch timeout, a daily version check, and state kept under
//! `~/.suite-core`.
//!
//! ```text
//! <home>/
//! ├── components/<slug>/   <- installed shared-component tree
//! ├── backups/             <- timestamped snapshots taken before updates
//! ├── locks/<slug>.lock    <- single-flight install lock
//! └── state.json           <- ComponentRecord, notices, activation list
//! ```

pub(crate) mod helpers;
mod remote;

use std::path::PathBuf;
use std::time::Duration;

pub use remote::RemoteConfig;

use crate::config::helpers::{optional_env, parse_list, parse_positive_env};
use crate::error::ConfigError;
use crate::host::SiblingSpec;

/// Default slug of the shared component.
pub const DEFAULT_SLUG: &str = "suite-core";

/// Default key of the shared menu root.
pub const DEFAULT_MENU_ROOT: &str = "suite-plugins";

/// Version-check cadence and backup retention.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Minimum time between remote version checks.
    /// Env: `SUITE_CORE_CHECK_INTERVAL_HOURS` (default: 24).
    pub check_interval: Duration,
    /// Number of pre-update backups kept.
    /// Env: `SUITE_CORE_KEEP_BACKUPS` (default: 5).
    pub keep_backups: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(24 * 60 * 60),
            keep_backups: 5,
        }
    }
}

impl SyncConfig {
    fn resolve() -> Result<Self, ConfigError> {
        const KEY: &str = "SUITE_CORE_CHECK_INTERVAL_HOURS";
        let hours = parse_positive_env(KEY, 24)?;
        let secs = hours
            .checked_mul(60 * 60)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: KEY.to_string(),
                message: format!("{hours} hours is out of range"),
            })?;
        let keep = parse_positive_env("SUITE_CORE_KEEP_BACKUPS", 5)?;
        Ok(Self {
            check_interval: Duration::from_secs(secs),
            keep_backups: usize::try_from(keep).unwrap_or(usize::MAX),
        })
    }
}

/// Top-level configuration for the orchestrator and the CLI.
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// Stable identifier of the shared component. Env: `SUITE_CORE_SLUG`.
    pub slug: String,
    /// Display title of the shared menu root. Env: `SUITE_CORE_TITLE`.
    pub title: String,
    /// Key of the shared menu root.
    pub menu_root_key: String,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    /// State root. Env: `SUITE_CORE_HOME` (default: `~/.suite-core`).
    pub home: PathBuf,
    /// The fixed set of dependent extensions.
    pub siblings: Vec<SiblingSpec>,
}

impl SuiteConfig {
    /// Configuration rooted at `home` with every other value defaulted.
    pub fn with_home(home: PathBuf) -> Self {
        Self {
            slug: DEFAULT_SLUG.to_string(),
            title: "Suite Plugins".to_string(),
            menu_root_key: DEFAULT_MENU_ROOT.to_string(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
            home,
            siblings: SiblingSpec::default_set(),
        }
    }

    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let home = match optional_env("SUITE_CORE_HOME")? {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .ok_or(ConfigError::NoHomeDir)?
                .join(".suite-core"),
        };

        let mut config = Self::with_home(home);
        if let Some(slug) = optional_env("SUITE_CORE_SLUG")? {
            validate_slug("SUITE_CORE_SLUG", &slug)?;
            config.slug = slug;
        }
        if let Some(title) = optional_env("SUITE_CORE_TITLE")? {
            config.title = title;
        }
        config.remote = RemoteConfig::resolve()?;
        config.sync = SyncConfig::resolve()?;

        if let Some(raw) = optional_env("SUITE_CORE_SIBLINGS")? {
            let defaults = SiblingSpec::default_set();
            let mut siblings = Vec::new();
            for slug in parse_list(&raw) {
                validate_slug("SUITE_CORE_SIBLINGS", &slug)?;
                let spec = defaults
                    .iter()
                    .find(|s| s.slug == slug)
                    .cloned()
                    .unwrap_or_else(|| SiblingSpec::new(&slug, &slug, ""));
                siblings.push(spec);
            }
            config.siblings = siblings;
        }

        Ok(config)
    }

    /// Directory that holds installed component trees.
    pub fn components_dir(&self) -> PathBuf {
        self.home.join("components")
    }

    /// Directory of the shared component itself.
    pub fn component_dir(&self) -> PathBuf {
        self.components_dir().join(&self.slug)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.home.join("backups")
    }

    /// Directory of the single-flight lock files.
    pub fn locks_dir(&self) -> PathBuf {
        self.home.join("locks")
    }

    pub fn state_path(&self) -> PathBuf {
        self.home.join("state.json")
    }
}

/// Slugs become directory names, so path separators and traversal are rejected.
fn validate_slug(key: &str, slug: &str) -> Result<(), ConfigError> {
    let valid = !slug.is_empty()
        && slug.len() <= 64
        && !slug.contains("..")
        && slug
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{slug}' is not a valid slug"),
        })
    }
}
