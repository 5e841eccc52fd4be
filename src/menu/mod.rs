//! Shared menu root that every sibling attaches its pages to.
//!
//! The host rebuilds its menu tree on every pass. Hooks run in priority
//! order (lower number runs first) against a fresh [`MenuTree`]; the shared
//! root is created at most once per key per pass no matter how many siblings
//! ask for it.

use std::fmt::Write as _;
use std::sync::Arc;

/// Renders the page behind a menu entry.
pub type PageHandler = Arc<dyn Fn() -> String + Send + Sync>;

/// Callback run during a menu pass.
pub type MenuHook = Box<dyn Fn(&mut MenuTree) + Send + Sync>;

/// Priority used by [`SharedMenuRegistry::register`].
pub const ROOT_PRIORITY: u32 = 5;

/// Priority used by [`MenuPass::add`].
pub const DEFAULT_PRIORITY: u32 = 10;

#[derive(Clone)]
pub struct SubmenuDescriptor {
    pub title: String,
    pub slug: String,
    pub handler: PageHandler,
}

impl SubmenuDescriptor {
    pub fn new(title: &str, slug: &str, handler: PageHandler) -> Self {
        Self {
            title: title.to_string(),
            slug: slug.to_string(),
            handler,
        }
    }
}

impl std::fmt::Debug for SubmenuDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmenuDescriptor")
            .field("title", &self.title)
            .field("slug", &self.slug)
            .finish_non_exhaustive()
    }
}

/// A top-level entry and its submenus, in attach order.
pub struct MenuEntry {
    pub key: String,
    pub title: String,
    renderer: PageHandler,
    submenus: Vec<SubmenuDescriptor>,
}

impl MenuEntry {
    pub fn submenus(&self) -> &[SubmenuDescriptor] {
        &self.submenus
    }

    pub fn render(&self) -> String {
        (self.renderer)()
    }
}

/// The host's menu for one pass.
#[derive(Default)]
pub struct MenuTree {
    entries: Vec<MenuEntry>,
}

impl MenuTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entry(key).is_some()
    }

    pub fn entry(&self, key: &str) -> Option<&MenuEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    fn entry_mut(&mut self, key: &str) -> Option<&mut MenuEntry> {
        self.entries.iter_mut().find(|e| e.key == key)
    }

    /// Number of top-level entries registered under `key`.
    pub fn count(&self, key: &str) -> usize {
        self.entries.iter().filter(|e| e.key == key).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a top-level entry unconditionally, the way the host does.
    pub fn add_entry(&mut self, key: &str, title: &str, renderer: PageHandler) {
        self.entries.push(MenuEntry {
            key: key.to_string(),
            title: title.to_string(),
            renderer,
            submenus: Vec::new(),
        });
    }

    /// Plain-text outline, one line per entry.
    pub fn render_outline(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(out, "{} ({})", entry.title, entry.key);
            for sub in &entry.submenus {
                let _ = writeln!(out, "  - {} ({})", sub.title, sub.slug);
            }
        }
        out
    }
}

/// Handle to an ensured root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootHandle {
    pub key: String,
    pub title: String,
}

/// The suite's single menu root.
#[derive(Clone)]
pub struct SharedMenuRegistry {
    root_key: String,
    title: String,
    renderer: PageHandler,
}

impl SharedMenuRegistry {
    pub fn new(root_key: &str, title: &str) -> Self {
        let heading = format!("<h1>{title}</h1>");
        Self {
            root_key: root_key.to_string(),
            title: title.to_string(),
            renderer: Arc::new(move || heading.clone()),
        }
    }

    pub fn with_renderer(mut self, renderer: PageHandler) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn handle(&self) -> RootHandle {
        RootHandle {
            key: self.root_key.clone(),
            title: self.title.clone(),
        }
    }

    /// Create the root `key` unless the tree already has it.
    pub fn ensure_root(
        tree: &mut MenuTree,
        key: &str,
        title: &str,
        renderer: PageHandler,
    ) -> RootHandle {
        if !tree.contains(key) {
            tree.add_entry(key, title, renderer);
            tracing::debug!(root = %key, "Registered shared menu root");
        }
        RootHandle {
            key: key.to_string(),
            title: title.to_string(),
        }
    }

    /// Ensure this registry's root exists in `tree`.
    pub fn ensure(&self, tree: &mut MenuTree) -> RootHandle {
        Self::ensure_root(tree, &self.root_key, &self.title, Arc::clone(&self.renderer))
    }

    /// Attach `submenu` under `root`, creating the root first if needed.
    ///
    /// Returns `false` when a submenu with the same slug is already attached.
    pub fn attach(
        &self,
        tree: &mut MenuTree,
        root: &RootHandle,
        submenu: SubmenuDescriptor,
    ) -> bool {
        Self::ensure_root(tree, &root.key, &root.title, Arc::clone(&self.renderer));
        let Some(entry) = tree.entry_mut(&root.key) else {
            return false;
        };
        if entry.submenus.iter().any(|s| s.slug == submenu.slug) {
            return false;
        }
        entry.submenus.push(submenu);
        true
    }

    /// Add the root-creating hook to `pass`.
    pub fn register(&self, pass: &mut MenuPass) {
        let registry = self.clone();
        pass.add_with_priority(
            ROOT_PRIORITY,
            Box::new(move |tree| {
                registry.ensure(tree);
            }),
        );
    }
}

/// Ordered hooks run against a fresh tree.
#[derive(Default)]
pub struct MenuPass {
    hooks: Vec<(u32, MenuHook)>,
}

impl MenuPass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hook: MenuHook) {
        self.add_with_priority(DEFAULT_PRIORITY, hook);
    }

    pub fn add_with_priority(&mut self, priority: u32, hook: MenuHook) {
        self.hooks.push((priority, hook));
        // Stable: equal priorities keep registration order.
        self.hooks.sort_by_key(|(p, _)| *p);
    }

    /// Build a new tree by running every hook.
    pub fn run(&self) -> MenuTree {
        let mut tree = MenuTree::new();
        for (_, hook) in &self.hooks {
            hook(&mut tree);
        }
        tree
    }
}
