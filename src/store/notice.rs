use serde::Serialize;
use serde_json::{Value, json};

use crate::error::StoreError;
use crate::store::StateStore;

/// One-shot status flag surfaced to the presentation layer.
///
/// Raising a notice that is already pending does not duplicate it; reading
/// notices through [`Notice::take_all`] clears them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// The component was updated from the remote to `version`.
    Updated { version: String },
    /// The component was deactivated because no sibling needs it.
    Retired,
    /// The component was installed and activated.
    Installed,
    /// The remote source was unreachable; the previous or fallback state is in use.
    RemoteUnavailable,
    /// Neither the remote nor the local fallback produced a component.
    InstallFailed,
    /// An update reached the remote but could not be applied locally.
    SyncFailed,
}

impl Notice {
    const UPDATE: &'static str = "updateNotice";
    const CLEANUP: &'static str = "cleanupNotice";
    const INSTALL_SUCCESS: &'static str = "installSuccessNotice";
    const REMOTE_ERROR: &'static str = "remoteErrorNotice";
    const INSTALL_FAILED: &'static str = "installFailedNotice";
    const SYNC_FAILED: &'static str = "syncErrorNotice";

    /// Every notice key, in display order.
    pub const KEYS: &'static [&'static str] = &[
        Self::UPDATE,
        Self::CLEANUP,
        Self::INSTALL_SUCCESS,
        Self::REMOTE_ERROR,
        Self::INSTALL_FAILED,
        Self::SYNC_FAILED,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Self::Updated { .. } => Self::UPDATE,
            Self::Retired => Self::CLEANUP,
            Self::Installed => Self::INSTALL_SUCCESS,
            Self::RemoteUnavailable => Self::REMOTE_ERROR,
            Self::InstallFailed => Self::INSTALL_FAILED,
            Self::SyncFailed => Self::SYNC_FAILED,
        }
    }

    fn value(&self) -> Value {
        match self {
            Self::Updated { version } => json!(version),
            _ => json!(true),
        }
    }

    fn from_entry(key: &str, value: &Value) -> Option<Self> {
        match key {
            Self::UPDATE => value.as_str().map(|v| Self::Updated {
                version: v.to_string(),
            }),
            Self::CLEANUP if value.as_bool() == Some(true) => Some(Self::Retired),
            Self::INSTALL_SUCCESS if value.as_bool() == Some(true) => Some(Self::Installed),
            Self::REMOTE_ERROR if value.as_bool() == Some(true) => Some(Self::RemoteUnavailable),
            Self::INSTALL_FAILED if value.as_bool() == Some(true) => Some(Self::InstallFailed),
            Self::SYNC_FAILED if value.as_bool() == Some(true) => Some(Self::SyncFailed),
            _ => None,
        }
    }

    /// Set this notice. An identical pending notice is left as is.
    pub fn raise(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        let value = self.value();
        if store.get(self.key())?.as_ref() == Some(&value) {
            return Ok(());
        }
        store.set(self.key(), value)
    }

    /// Drop a pending notice without reading it.
    pub fn clear(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        store.delete(self.key())
    }

    /// Read every pending notice and clear it.
    pub fn take_all(store: &dyn StateStore) -> Result<Vec<Self>, StoreError> {
        let mut notices = Vec::new();
        let mut pending = Vec::new();
        for key in Self::KEYS {
            if let Some(value) = store.get(key)? {
                pending.push(*key);
                if let Some(notice) = Self::from_entry(key, &value) {
                    notices.push(notice);
                }
            }
        }
        if !pending.is_empty() {
            store.apply(Vec::new(), &pending)?;
        }
        Ok(notices)
    }
}
