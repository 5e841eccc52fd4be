//! Single-flight guard for installs and updates.
//!
//! The guard holds an exclusive advisory lock on `locks/{slug}.lock`.
//! The OS releases it when the guard is dropped or the process dies, so the
//! lock file itself is left in place.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

use fs4::fs_std::FileExt;

/// Exclusive claim on installing one component. Released on drop.
#[derive(Debug)]
pub struct InstallLock {
    _file: File,
}

impl InstallLock {
    /// Try to claim the lock for `slug` in `dir` without blocking.
    ///
    /// Returns `Ok(None)` while another holder has it.
    pub fn acquire(dir: &Path, slug: &str) -> io::Result<Option<Self>> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{slug}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { _file: file })),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                tracing::debug!(path = %path.display(), "Install lock is held");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let first = InstallLock::acquire(dir.path(), "suite-core")
            .unwrap()
            .expect("first acquire");
        assert!(
            InstallLock::acquire(dir.path(), "suite-core")
                .unwrap()
                .is_none()
        );

        drop(first);
        assert!(
            InstallLock::acquire(dir.path(), "suite-core")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_old_lock_file_does_not_let_a_second_holder_in() {
        let dir = tempfile::tempdir().unwrap();
        let first = InstallLock::acquire(dir.path(), "suite-core")
            .unwrap()
            .unwrap();

        // An hour-old lock file whose holder is still alive.
        let hour_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(dir.path().join("suite-core.lock"))
            .unwrap()
            .set_modified(hour_ago)
            .unwrap();

        assert!(
            InstallLock::acquire(dir.path(), "suite-core")
                .unwrap()
                .is_none()
        );
        drop(first);

        let second = InstallLock::acquire(dir.path(), "suite-core")
            .unwrap()
            .expect("free after release");
        assert!(
            InstallLock::acquire(dir.path(), "suite-core")
                .unwrap()
                .is_none()
        );
        drop(second);
    }

    #[test]
    fn test_leftover_lock_file_is_not_held() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("suite-core.lock"), "12345\n").unwrap();

        assert!(
            InstallLock::acquire(dir.path(), "suite-core")
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_locks_are_per_slug() {
        let dir = tempfile::tempdir().unwrap();
        let _a = InstallLock::acquire(dir.path(), "a").unwrap().unwrap();
        assert!(InstallLock::acquire(dir.path(), "b").unwrap().is_some());
    }
}
