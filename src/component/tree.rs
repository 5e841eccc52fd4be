//! On-disk layout of the shared component and its activation contract.
//!
//! A tree is loadable when `<slug>.json` parses, declares the expected slug
//! and a version, and the menu module it points at parses too:
//!
//! ```text
//! components/
//! ├── <slug>/
//! │   ├── <slug>.json
//! │   ├── includes/menu.json
//! │   └── README.txt
//! └── .staging-<slug>-XXXX/   <- in-flight install, same filesystem
//!     └── <slug>/
//! ```
//!
//! Installs are written into a staging directory next to the live tree and
//! swapped in with renames, so a failed install never leaves a partial tree.

use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::error::TreeError;

/// Contents of `<slug>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHeader {
    pub slug: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Path of the menu module, relative to the tree root.
    pub menu_module: String,
    /// Set by the fallback synthesizer.
    #[serde(default)]
    pub generated_locally: bool,
}

/// Contents of the menu module: the shared root every sibling attaches to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuModule {
    pub root_key: String,
    pub title: String,
    #[serde(default = "default_capability")]
    pub capability: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
}

fn default_capability() -> String {
    "manage_options".to_string()
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, TreeError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TreeError::Missing(path.to_path_buf()));
        }
        Err(e) => {
            return Err(TreeError::Malformed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            });
        }
    };
    serde_json::from_slice(&bytes).map_err(|e| TreeError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Check the activation contract of the tree rooted at `root`.
pub fn verify_dir(root: &Path, slug: &str) -> Result<ComponentHeader, TreeError> {
    let header_path = root.join(format!("{slug}.json"));
    let header: ComponentHeader = read_json(&header_path)?;

    if header.slug != slug {
        return Err(TreeError::SlugMismatch {
            expected: slug.to_string(),
            found: header.slug,
        });
    }
    if header.version.trim().is_empty() {
        return Err(TreeError::Malformed {
            path: header_path,
            reason: "empty version".to_string(),
        });
    }

    let menu_rel = relative_path(&header.menu_module).map_err(|e| TreeError::Malformed {
        path: header_path.clone(),
        reason: e.to_string(),
    })?;
    let menu_path = root.join(menu_rel);
    let menu: MenuModule = read_json(&menu_path)?;
    if menu.root_key.trim().is_empty() {
        return Err(TreeError::Malformed {
            path: menu_path,
            reason: "empty root_key".to_string(),
        });
    }

    Ok(header)
}

/// Validate a tree-relative path: no absolute paths, no `..`.
fn relative_path(rel: &str) -> io::Result<&Path> {
    let path = Path::new(rel);
    let safe = !rel.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(path)
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{rel}' escapes the component tree"),
        ))
    }
}

/// An install being assembled next to the live tree.
pub struct StagedTree {
    // Dropping the guard removes whatever was not committed.
    _guard: TempDir,
    root: PathBuf,
}

impl StagedTree {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write one file at `rel` inside the staged tree.
    pub fn write(&self, rel: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.root.join(relative_path(rel)?);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
    }
}

/// The live component directory `<components_dir>/<slug>`.
#[derive(Debug, Clone)]
pub struct ComponentTree {
    components_dir: PathBuf,
    slug: String,
}

impl ComponentTree {
    pub fn new(components_dir: impl Into<PathBuf>, slug: &str) -> Self {
        Self {
            components_dir: components_dir.into(),
            slug: slug.to_string(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.components_dir.join(&self.slug)
    }

    pub fn components_dir(&self) -> &Path {
        &self.components_dir
    }

    pub fn exists(&self) -> bool {
        self.path().is_dir()
    }

    pub fn verify(&self) -> Result<ComponentHeader, TreeError> {
        verify_dir(&self.path(), &self.slug)
    }

    /// Create an empty staging tree on the same filesystem as the live one.
    pub fn stage(&self) -> io::Result<StagedTree> {
        std::fs::create_dir_all(&self.components_dir)?;
        let guard = tempfile::Builder::new()
            .prefix(&format!(".staging-{}-", self.slug))
            .tempdir_in(&self.components_dir)?;
        let root = guard.path().join(&self.slug);
        std::fs::create_dir(&root)?;
        Ok(StagedTree {
            _guard: guard,
            root,
        })
    }

    /// Swap `staged` in as the live tree.
    ///
    /// The previous tree is moved aside first and restored if the final
    /// rename fails.
    pub fn commit(&self, staged: StagedTree) -> io::Result<()> {
        let live = self.path();
        let previous = self.components_dir.join(format!(".{}.previous", self.slug));
        if previous.exists() {
            std::fs::remove_dir_all(&previous)?;
        }

        let had_previous = live.exists();
        if had_previous {
            std::fs::rename(&live, &previous)?;
        }

        if let Err(e) = std::fs::rename(staged.root(), &live) {
            if had_previous && let Err(restore) = std::fs::rename(&previous, &live) {
                tracing::error!(
                    path = %live.display(),
                    error = %restore,
                    "Failed to restore previous component tree"
                );
            }
            return Err(e);
        }

        if had_previous && let Err(e) = std::fs::remove_dir_all(&previous) {
            tracing::warn!(path = %previous.display(), error = %e, "Failed to remove replaced tree");
        }
        Ok(())
    }

    /// Delete the live tree. A missing tree is not an error.
    pub fn remove(&self) -> io::Result<()> {
        match std::fs::remove_dir_all(self.path()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
