//! Persisted state of the shared component.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::StoreError;
use crate::store::{StateStore, keys};

/// Where the installed tree came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Remote,
    LocalFallback,
    /// Adopted from disk, or left behind by an incomplete write.
    Unknown,
}

impl Source {
    /// The two persisted provenance flags, `(installedFromRemote, createdLocally)`.
    fn flags(self) -> (bool, bool) {
        match self {
            Self::Remote => (true, false),
            Self::LocalFallback => (false, true),
            Self::Unknown => (false, false),
        }
    }

    fn from_flags(from_remote: bool, created_locally: bool) -> Self {
        match (from_remote, created_locally) {
            (true, false) => Self::Remote,
            (false, true) => Self::LocalFallback,
            // Both set only happens when a write was interrupted.
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::LocalFallback => write!(f, "local fallback"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRecord {
    pub slug: String,
    pub installed_version: String,
    pub source: Source,
    pub last_update_check: Option<DateTime<Utc>>,
    /// Set on the first successful install and never moved afterwards.
    pub installed_at: DateTime<Utc>,
    /// Installed by the orchestrator, so it may be retired automatically.
    pub auto_generated: bool,
}

fn timestamp(store: &dyn StateStore, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    Ok(store
        .get_i64(key)?
        .and_then(|secs| DateTime::from_timestamp(secs, 0)))
}

impl ComponentRecord {
    /// A record for a tree that was just installed.
    pub fn new(slug: &str, version: &str, source: Source, now: DateTime<Utc>) -> Self {
        Self {
            slug: slug.to_string(),
            installed_version: version.to_string(),
            source,
            last_update_check: Some(now),
            installed_at: now,
            auto_generated: true,
        }
    }

    /// Read the record. `None` unless `installed` is set.
    pub fn load(store: &dyn StateStore, slug: &str) -> Result<Option<Self>, StoreError> {
        if !store.get_bool(keys::INSTALLED)? {
            return Ok(None);
        }

        let source = Source::from_flags(
            store.get_bool(keys::INSTALLED_FROM_REMOTE)?,
            store.get_bool(keys::CREATED_LOCALLY)?,
        );
        let last_update_check = timestamp(store, keys::LAST_UPDATE_CHECK)?;
        let installed_at = timestamp(store, keys::INSTALLED_AT)?
            .or(last_update_check)
            .unwrap_or_default();

        Ok(Some(Self {
            slug: store
                .get_string(keys::SLUG)?
                .unwrap_or_else(|| slug.to_string()),
            installed_version: store.get_string(keys::VERSION)?.unwrap_or_default(),
            source,
            last_update_check,
            installed_at,
            auto_generated: store.get_bool(keys::AUTO_GENERATED)?,
        }))
    }

    /// Write every record key in one update.
    pub fn save(&self, store: &dyn StateStore) -> Result<(), StoreError> {
        let (from_remote, created_locally) = self.source.flags();
        let mut writes: Vec<(&str, Value)> = vec![
            (keys::SLUG, json!(self.slug)),
            (keys::INSTALLED, json!(true)),
            (keys::VERSION, json!(self.installed_version)),
            (keys::INSTALLED_FROM_REMOTE, json!(from_remote)),
            (keys::CREATED_LOCALLY, json!(created_locally)),
            (keys::INSTALLED_AT, json!(self.installed_at.timestamp())),
            (keys::AUTO_GENERATED, json!(self.auto_generated)),
        ];
        let mut deletes = Vec::new();
        match self.last_update_check {
            Some(at) => writes.push((keys::LAST_UPDATE_CHECK, json!(at.timestamp()))),
            None => deletes.push(keys::LAST_UPDATE_CHECK),
        }
        store.apply(writes, &deletes)
    }

    /// Remove every record key.
    pub fn clear(store: &dyn StateStore) -> Result<(), StoreError> {
        store.apply(Vec::new(), keys::RECORD)
    }

    /// Record that the remote version was consulted at `now`.
    pub fn record_check(store: &dyn StateStore, now: DateTime<Utc>) -> Result<(), StoreError> {
        store.set(keys::LAST_UPDATE_CHECK, json!(now.timestamp()))
    }

    pub fn status(&self) -> ComponentStatus {
        ComponentStatus {
            version: self.installed_version.clone(),
            source: self.source,
            last_update_check: self.last_update_check,
            installed_at: self.installed_at,
            auto_generated: self.auto_generated,
        }
    }
}

/// Read-only status fields for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub version: String,
    pub source: Source,
    pub last_update_check: Option<DateTime<Utc>>,
    pub installed_at: DateTime<Utc>,
    pub auto_generated: bool,
}
