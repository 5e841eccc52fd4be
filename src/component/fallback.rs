//! Local substitute for the shared component when the remote is unreachable.

use crate::component::tree::{ComponentHeader, ComponentTree, MenuModule, verify_dir};
use crate::error::SynthesisError;
use crate::remote::RemoteLayout;

/// Version written into every synthesized header.
pub const FALLBACK_VERSION: &str = "1.0.0";

const README_TEMPLATE: &str = "=== {title} ===
Stable tag: {version}

Shared menu root and coordination utilities for the {title} suite.

This copy was generated locally because the remote source could not be
reached. It is replaced by the published component on the next successful
update check.
";

/// Writes a minimal, loadable component tree from built-in templates.
#[derive(Debug, Clone)]
pub struct FallbackSynthesizer {
    slug: String,
    title: String,
    menu_root_key: String,
    layout: RemoteLayout,
}

impl FallbackSynthesizer {
    pub fn new(slug: &str, title: &str, menu_root_key: &str) -> Self {
        Self {
            slug: slug.to_string(),
            title: title.to_string(),
            menu_root_key: menu_root_key.to_string(),
            layout: RemoteLayout::for_slug(slug),
        }
    }

    pub fn header(&self) -> ComponentHeader {
        ComponentHeader {
            slug: self.slug.clone(),
            name: self.title.clone(),
            version: FALLBACK_VERSION.to_string(),
            description: format!("Shared menu root for the {} suite.", self.title),
            menu_module: self.layout.menu_module.clone(),
            generated_locally: true,
        }
    }

    /// The rendered files, `(relative path, contents)`. Identical on every call.
    pub fn files(&self) -> Result<Vec<(String, Vec<u8>)>, SynthesisError> {
        let header = serde_json::to_vec_pretty(&self.header()).map_err(|e| {
            SynthesisError::Template {
                name: "header",
                reason: e.to_string(),
            }
        })?;

        let menu = MenuModule {
            root_key: self.menu_root_key.clone(),
            title: self.title.clone(),
            capability: "manage_options".to_string(),
            icon: Some("dashicons-admin-plugins".to_string()),
            position: Some(80),
        };
        let menu = serde_json::to_vec_pretty(&menu).map_err(|e| SynthesisError::Template {
            name: "menu",
            reason: e.to_string(),
        })?;

        let readme = README_TEMPLATE
            .replace("{title}", &self.title)
            .replace("{version}", FALLBACK_VERSION);

        Ok(vec![
            (self.layout.entry.clone(), header),
            (self.layout.menu_module.clone(), menu),
            (self.layout.readme.clone(), readme.into_bytes()),
        ])
    }

    /// Write the fallback tree and swap it in as the live tree.
    ///
    /// Nothing at the live path changes unless every file was written and the
    /// staged tree passed the activation contract.
    pub fn synthesize(&self, tree: &ComponentTree) -> Result<ComponentHeader, SynthesisError> {
        let write_err = |path: std::path::PathBuf, e: std::io::Error| SynthesisError::Write {
            path,
            reason: e.to_string(),
        };

        let staged = tree
            .stage()
            .map_err(|e| write_err(tree.components_dir().to_path_buf(), e))?;
        for (rel, contents) in self.files()? {
            staged
                .write(&rel, &contents)
                .map_err(|e| write_err(staged.root().join(&rel), e))?;
        }

        let header =
            verify_dir(staged.root(), &self.slug).map_err(|e| SynthesisError::Invalid {
                path: staged.root().to_path_buf(),
                reason: e.to_string(),
            })?;

        tree.commit(staged).map_err(|e| write_err(tree.path(), e))?;
        tracing::info!(slug = %self.slug, path = %tree.path().display(), "Synthesized local component");
        Ok(header)
    }
}
