//! Remote and filesystem diagnostics.
//!
//! Fetches every published resource without installing anything and checks
//! that the components directory is writable. Digests are reported so an
//! operator can compare them out of band; they are not checked against
//! anything.

use std::io::Write as _;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::RemoteConfig;
use crate::remote::{RemoteFetcher, RemoteLayout};

/// Bytes of each body included in the report.
const PREVIEW_BYTES: usize = 500;

/// Result of fetching one resource.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceProbe {
    pub path: String,
    pub url: String,
    pub ok: bool,
    pub size: Option<usize>,
    pub sha256: Option<String>,
    pub preview: Option<String>,
    pub error: Option<String>,
}

/// Full diagnostics report.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub resources: Vec<ResourceProbe>,
    pub filesystem_writable: bool,
    pub filesystem_error: Option<String>,
}

impl ProbeReport {
    /// Whether every required resource arrived and the disk is writable.
    pub fn healthy(&self) -> bool {
        self.filesystem_writable && self.resources.iter().all(|r| r.ok)
    }
}

/// Fetch each resource in `layout` and test that `components_dir` is writable.
pub async fn probe(
    fetcher: &dyn RemoteFetcher,
    remote: &RemoteConfig,
    layout: &RemoteLayout,
    components_dir: &Path,
) -> ProbeReport {
    let mut paths: Vec<&str> = layout.required().to_vec();
    if let Some(version) = layout.version.as_deref() {
        paths.push(version);
    }

    let mut resources = Vec::with_capacity(paths.len());
    for path in paths {
        let url = remote.url_for(path);
        let probe = match fetcher.fetch(&url, remote.timeout).await {
            Ok(bytes) => ResourceProbe {
                path: path.to_string(),
                url,
                ok: true,
                size: Some(bytes.len()),
                sha256: Some(format!("{:x}", Sha256::digest(&bytes))),
                preview: Some(preview(&bytes)),
                error: None,
            },
            Err(e) => ResourceProbe {
                path: path.to_string(),
                url,
                ok: false,
                size: None,
                sha256: None,
                preview: None,
                error: Some(e.to_string()),
            },
        };
        resources.push(probe);
    }

    let (filesystem_writable, filesystem_error) = match check_writable(components_dir) {
        Ok(()) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    ProbeReport {
        resources,
        filesystem_writable,
        filesystem_error,
    }
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(b"test")?;
    file.as_file().sync_all()?;
    Ok(())
}

fn preview(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= PREVIEW_BYTES {
        return text.into_owned();
    }
    let mut cut = PREVIEW_BYTES;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}
