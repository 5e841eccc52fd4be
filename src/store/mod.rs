//! Persisted key-value state.
//!
//! The shared component's record, the one-shot notices shown by the
//! presentation layer, and the host activation list all live in one flat
//! key-value namespace. [`JsonFileStore`] keeps it in a single JSON document
//! that is re-read on every access and replaced atomically on every write, so
//! two processes never observe a half-written file.

mod notice;

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

pub use notice::Notice;

use crate::error::StoreError;

/// Record keys.
pub mod keys {
    pub const SLUG: &str = "slug";
    pub const INSTALLED: &str = "installed";
    pub const VERSION: &str = "version";
    pub const INSTALLED_FROM_REMOTE: &str = "installedFromRemote";
    pub const CREATED_LOCALLY: &str = "createdLocally";
    pub const LAST_UPDATE_CHECK: &str = "lastUpdateCheck";
    pub const INSTALLED_AT: &str = "installedAt";
    pub const AUTO_GENERATED: &str = "autoGenerated";

    /// Host activation list, used by `StoreActivationRegistry`.
    pub const ACTIVE_COMPONENTS: &str = "activeComponents";

    /// Every key owned by the component record.
    pub const RECORD: &[&str] = &[
        SLUG,
        INSTALLED,
        VERSION,
        INSTALLED_FROM_REMOTE,
        CREATED_LOCALLY,
        LAST_UPDATE_CHECK,
        INSTALLED_AT,
        AUTO_GENERATED,
    ];
}

/// Flat key-value storage for orchestrator state.
pub trait StateStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Apply several writes and deletes as one update.
    ///
    /// The default applies them one by one; file-backed stores override it so
    /// the batch lands in a single atomic replace.
    fn apply(&self, writes: Vec<(&str, Value)>, deletes: &[&str]) -> Result<(), StoreError> {
        for (key, value) in writes {
            self.set(key, value)?;
        }
        for key in deletes {
            self.delete(key)?;
        }
        Ok(())
    }

    fn get_bool(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.and_then(|v| v.as_bool()).unwrap_or(false))
    }

    fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .get(key)?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    fn get_i64(&self, key: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.get(key)?.and_then(|v| v.as_i64()))
    }
}

/// In-memory store for embedders and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .lock()
            .map(|values| values.clone())
            .unwrap_or_default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.remove(key);
        Ok(())
    }
}

fn poisoned() -> StoreError {
    StoreError::Corrupt {
        path: PathBuf::from("<memory>"),
        reason: "store mutex poisoned".to_string(),
    }
}

/// JSON-document store on disk.
pub struct JsonFileStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, Value>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    reason: e.to_string(),
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn persist(&self, values: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let write_err = |reason: String| StoreError::Write {
            path: self.path.clone(),
            reason,
        };

        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;

        let json = serde_json::to_vec_pretty(values).map_err(|e| write_err(e.to_string()))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| write_err(e.to_string()))?;
        tmp.write_all(&json).map_err(|e| write_err(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| write_err(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| write_err(e.error.to_string()))?;
        Ok(())
    }

    fn update(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> bool,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Corrupt {
            path: self.path.clone(),
            reason: "store mutex poisoned".to_string(),
        })?;
        let mut values = self.load()?;
        if f(&mut values) {
            self.persist(&values)?;
        }
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.update(|values| {
            values.insert(key.to_string(), value);
            true
        })
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.update(|values| values.remove(key).is_some())
    }

    fn apply(&self, writes: Vec<(&str, Value)>, deletes: &[&str]) -> Result<(), StoreError> {
        self.update(|values| {
            for (key, value) in writes {
                values.insert(key.to_string(), value);
            }
            for key in deletes {
                values.remove(*key);
            }
            true
        })
    }
}
