//! Error types for the shared-component orchestrator.
//!
//! Every failure here is scoped to a single sync attempt. The orchestrator
//! turns them into recorded notices; none of them is meant to reach the host
//! as a fatal error.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration resolution errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Could not resolve a home directory for suite state")]
    NoHomeDir,
}

/// Failure to retrieve a remote resource.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request to {url} timed out after {}s", timeout.as_secs_f32())]
    Timeout { url: String, timeout: Duration },

    #[error("Request to {url} returned HTTP {code}")]
    HttpStatus { url: String, code: u16 },

    #[error("Request to {url} failed: {reason}")]
    Network { url: String, reason: String },
}

impl FetchError {
    /// URL the failed request was addressed to.
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. } | Self::HttpStatus { url, .. } | Self::Network { url, .. } => {
                url
            }
        }
    }
}

/// Failure to snapshot an existing component tree.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Nothing to back up at {0}")]
    SourceMissing(PathBuf),

    #[error("Failed to copy {path} into backup: {reason}")]
    Copy { path: PathBuf, reason: String },

    #[error("Failed to create backup directory {path}: {reason}")]
    CreateDir { path: PathBuf, reason: String },
}

/// A component tree that does not satisfy the activation contract.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("Component file {0} is missing")]
    Missing(PathBuf),

    #[error("Component file {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Component header declares slug '{found}', expected '{expected}'")]
    SlugMismatch { expected: String, found: String },
}

/// Failure to write the locally synthesized component.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("Failed to write fallback file {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("Failed to render fallback template {name}: {reason}")]
    Template { name: &'static str, reason: String },

    #[error("Synthesized tree at {path} is not loadable: {reason}")]
    Invalid { path: PathBuf, reason: String },
}

/// Persisted key-value store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to read state file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to write state file {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("State file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Host activation surface errors.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("Failed to change activation of '{slug}': {reason}")]
    Host { slug: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of one remote install or update attempt.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Filesystem error at {path}: {reason}")]
    Filesystem { path: PathBuf, reason: String },

    #[error("Downloaded tree is not loadable: {0}")]
    InvalidTree(#[from] TreeError),

    #[error("Downloaded version {found} cannot replace installed {installed}")]
    NotNewer { found: String, installed: String },
}

/// Failure of the explicit removal action.
#[derive(Debug, thiserror::Error)]
pub enum RemovalError {
    #[error("Cannot remove '{slug}': siblings still active ({active})")]
    SiblingsActive { slug: String, active: String },

    #[error("Failed to delete {path}: {reason}")]
    Delete { path: PathBuf, reason: String },

    #[error("Another install or update of '{slug}' is in progress")]
    Busy { slug: String },

    #[error(transparent)]
    Activation(#[from] ActivationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
