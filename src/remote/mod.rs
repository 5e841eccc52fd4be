//! Remote source of the shared component.
//!
//! The component is published as a small fixed set of files under one base
//! URL:
//!
//! ```text
//! <base_url>/
//! ├── <slug>.json          <- component header (activation contract)
//! ├── includes/menu.json   <- shared menu root declaration
//! ├── README.txt
//! └── version.json         <- optional, {"version": "1.2.0"}
//! ```
//!
//! Fetching never touches the disk. Callers stage the bytes themselves.

mod http;
pub mod probe;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

pub use http::HttpFetcher;
pub use probe::{ProbeReport, ResourceProbe};

use crate::error::FetchError;

/// Bounded-timeout retrieval of a single remote resource.
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Fetch `url`, giving up after `timeout`.
    ///
    /// Only a 200 response with a non-empty body counts as success.
    async fn fetch(&self, url: &str, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

/// Relative paths of the published component files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    /// Component header, `<slug>.json`.
    pub entry: String,
    /// Menu module referenced by the header.
    pub menu_module: String,
    pub readme: String,
    /// Optional version descriptor. When absent, the header's version is used.
    pub version: Option<String>,
}

impl RemoteLayout {
    pub const MENU_MODULE: &'static str = "includes/menu.json";
    pub const README: &'static str = "README.txt";
    pub const VERSION: &'static str = "version.json";

    pub fn for_slug(slug: &str) -> Self {
        Self {
            entry: format!("{slug}.json"),
            menu_module: Self::MENU_MODULE.to_string(),
            readme: Self::README.to_string(),
            version: Some(Self::VERSION.to_string()),
        }
    }

    /// Files that must all arrive for an install to be committed.
    pub fn required(&self) -> [&str; 3] {
        [&self.entry, &self.menu_module, &self.readme]
    }
}

/// Body of `version.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteVersion {
    pub version: String,
}

impl RemoteVersion {
    /// Parse a `version.json` body. Unparseable bodies yield `None`.
    pub fn parse(bytes: &[u8]) -> Option<String> {
        match serde_json::from_slice::<RemoteVersion>(bytes) {
            Ok(parsed) if !parsed.version.trim().is_empty() => {
                Some(parsed.version.trim().to_string())
            }
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable version.json");
                None
            }
        }
    }
}
