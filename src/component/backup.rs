//! Timestamped snapshots of the component tree, taken before it is replaced.
//! Only the newest `keep` snapshots of a component survive.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::BackupError;

pub struct BackupManager {
    backups_dir: PathBuf,
    keep: usize,
}

impl BackupManager {
    pub fn new(backups_dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            backups_dir: backups_dir.into(),
            keep: keep.max(1),
        }
    }

    /// Copy the tree at `component`, naming the copy after `now`.
    ///
    /// The copy is assembled under a `.partial` name and renamed when
    /// complete; a failed copy is removed and never looks like a backup.
    pub fn snapshot(
        &self,
        component: &Path,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, BackupError> {
        if !component.is_dir() {
            return Err(BackupError::SourceMissing(component.to_path_buf()));
        }
        std::fs::create_dir_all(&self.backups_dir).map_err(|e| BackupError::CreateDir {
            path: self.backups_dir.clone(),
            reason: e.to_string(),
        })?;

        let base = component
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "component".to_string());
        let stamp = now.format("%Y%m%d-%H%M%S");
        let target = self.free_name(&format!("{base}-{stamp}"));
        let partial = target.with_extension("partial");

        if let Err(e) = copy_tree(component, &partial) {
            let _ = std::fs::remove_dir_all(&partial);
            return Err(e);
        }
        std::fs::rename(&partial, &target).map_err(|e| {
            let _ = std::fs::remove_dir_all(&partial);
            BackupError::Copy {
                path: target.clone(),
                reason: e.to_string(),
            }
        })?;

        tracing::info!(
            source = %component.display(),
            backup = %target.display(),
            "Backed up component tree"
        );
        self.prune(&base);
        Ok(target)
    }

    /// Backups of the component named `base`, oldest first.
    pub fn list(&self, base: &str) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.backups_dir) else {
            return Vec::new();
        };
        let prefix = format!("{base}-");
        let mut backups: Vec<(String, u32, PathBuf)> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.extension().is_none_or(|ext| ext != "partial"))
            .filter_map(|p| {
                let name = p.file_name()?.to_str()?.to_string();
                let rest = name.strip_prefix(&prefix)?;
                // `YYYYmmdd-HHMMSS`, then an optional `-N` for same-second copies.
                let stamp = rest.get(..15)?.to_string();
                let seq = match rest.get(15..) {
                    Some("") | None => 1,
                    Some(suffix) => suffix.strip_prefix('-')?.parse().ok()?,
                };
                Some((stamp, seq, p))
            })
            .collect();
        backups.sort();
        backups.into_iter().map(|(_, _, path)| path).collect()
    }

    /// Delete the oldest backups of `base` beyond the retention count.
    fn prune(&self, base: &str) {
        let backups = self.list(base);
        let excess = backups.len().saturating_sub(self.keep);
        for old in &backups[..excess] {
            match std::fs::remove_dir_all(old) {
                Ok(()) => tracing::debug!(backup = %old.display(), "Pruned old backup"),
                Err(e) => {
                    tracing::warn!(backup = %old.display(), error = %e, "Failed to prune backup")
                }
            }
        }
    }

    fn free_name(&self, stem: &str) -> PathBuf {
        let first = self.backups_dir.join(stem);
        if !first.exists() && !first.with_extension("partial").exists() {
            return first;
        }
        let mut n = 2;
        loop {
            let candidate = self.backups_dir.join(format!("{stem}-{n}"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Recursive copy. Symlinks are skipped rather than followed.
fn copy_tree(from: &Path, to: &Path) -> Result<(), BackupError> {
    let copy_err = |path: &Path, e: std::io::Error| BackupError::Copy {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    std::fs::create_dir_all(to).map_err(|e| copy_err(to, e))?;
    for entry in std::fs::read_dir(from).map_err(|e| copy_err(from, e))? {
        let entry = entry.map_err(|e| copy_err(from, e))?;
        let src = entry.path();
        let dst = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| copy_err(&src, e))?;

        if file_type.is_symlink() {
            tracing::debug!(path = %src.display(), "Skipping symlink in backup");
        } else if file_type.is_dir() {
            copy_tree(&src, &dst)?;
        } else {
            std::fs::copy(&src, &dst).map_err(|e| copy_err(&src, e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn sample_tree(root: &Path) -> PathBuf {
        let tree = root.join("components").join("suite-core");
        std::fs::create_dir_all(tree.join("includes")).unwrap();
        std::fs::write(tree.join("suite-core.json"), "{}").unwrap();
        std::fs::write(tree.join("includes/menu.json"), "{}").unwrap();
        tree
    }

    #[test]
    fn test_snapshot_copies_everything() {
        let dir = tempfile::tempdir().unwrap();
        let tree = sample_tree(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"), 5);

        // 2023-11-14 22:13:20 UTC
        let backup = manager.snapshot(&tree, at(1_700_000_000)).unwrap();

        assert_eq!(
            backup.file_name().unwrap().to_str().unwrap(),
            "suite-core-20231114-221320"
        );
        assert_eq!(
            std::fs::read_to_string(backup.join("includes/menu.json")).unwrap(),
            "{}"
        );
        assert_eq!(manager.list("suite-core"), vec![backup]);
    }

    #[test]
    fn test_same_second_gets_unique_name() {
        let dir = tempfile::tempdir().unwrap();
        let tree = sample_tree(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"), 5);

        let a = manager.snapshot(&tree, at(1_700_000_000)).unwrap();
        let b = manager.snapshot(&tree, at(1_700_000_000)).unwrap();

        assert_ne!(a, b);
        assert!(b.to_str().unwrap().ends_with("-2"));
        assert_eq!(manager.list("suite-core"), vec![a, b]);
    }

    #[test]
    fn test_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = BackupManager::new(dir.path().join("backups"), 5);
        let err = manager
            .snapshot(&dir.path().join("nope"), at(0))
            .unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
    }

    #[test]
    fn test_unwritable_backups_dir_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let tree = sample_tree(dir.path());
        // A regular file where the backups directory should be.
        let blocker = dir.path().join("backups");
        std::fs::write(&blocker, "not a dir").unwrap();

        let manager = BackupManager::new(&blocker, 5);
        let err = manager.snapshot(&tree, at(0)).unwrap_err();
        assert!(matches!(err, BackupError::CreateDir { .. }), "got {err:?}");
    }

    #[test]
    fn test_only_newest_backups_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let tree = sample_tree(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"), 2);

        let _first = manager.snapshot(&tree, at(1_700_000_000)).unwrap();
        let second = manager.snapshot(&tree, at(1_700_086_400)).unwrap();
        let third = manager.snapshot(&tree, at(1_700_172_800)).unwrap();

        assert_eq!(manager.list("suite-core"), vec![second, third]);
    }

    #[test]
    fn test_same_second_copies_order_numerically() {
        let dir = tempfile::tempdir().unwrap();
        let tree = sample_tree(dir.path());
        let manager = BackupManager::new(dir.path().join("backups"), 20);

        let copies: Vec<_> = (0..11)
            .map(|_| manager.snapshot(&tree, at(1_700_000_000)).unwrap())
            .collect();

        assert_eq!(manager.list("suite-core"), copies);
    }
}
