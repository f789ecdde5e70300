//! The inter-process cache lock.
//!
//! One live manager owns a cache directory at a time, across processes. The
//! claim is a lock file created with must-not-exist semantics; finding the
//! file already present at startup means another instance crashed or is
//! still running, and construction fails hard.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{Result, SourceError};

const LOCK_FILE_NAME: &str = "sm.lock";

/// An exclusively-held lock file on a cache directory.
pub(crate) struct CacheLock {
    path: PathBuf,
    file: Option<File>,
}

impl std::fmt::Debug for CacheLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheLock").field("path", &self.path).finish()
    }
}

impl CacheLock {
    /// The lock file path for a cache directory.
    pub fn path_in(cachedir: &Path) -> PathBuf {
        cachedir.join(LOCK_FILE_NAME)
    }

    /// Claim the cache directory, creating the lock file.
    pub fn acquire(cachedir: &Path) -> Result<Self> {
        let path = Self::path_in(cachedir);

        if path.exists() {
            return Err(SourceError::CouldNotCreateLock {
                source: io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!(
                        "cache lock file {} exists - another process crashed or is still running?",
                        path.display()
                    ),
                ),
                path,
            });
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = options
            .open(&path)
            .map_err(|source| SourceError::CouldNotCreateLock {
                path: path.clone(),
                source,
            })?;

        Ok(CacheLock {
            path,
            file: Some(file),
        })
    }

    /// Close the handle and delete the file. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!("could not remove cache lock {}: {}", self.path.display(), e);
            }
        }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_creates_and_release_removes() {
        let tmp = TempDir::new().unwrap();
        let mut lock = CacheLock::acquire(tmp.path()).unwrap();
        assert!(tmp.path().join("sm.lock").exists());

        lock.release();
        assert!(!tmp.path().join("sm.lock").exists());

        // Releasing again is harmless.
        lock.release();
    }

    #[test]
    fn test_existing_lock_file_refuses_acquisition() {
        let tmp = TempDir::new().unwrap();
        let lock_path = tmp.path().join("sm.lock");
        fs::write(&lock_path, "").unwrap();

        let err = CacheLock::acquire(tmp.path()).unwrap_err();
        match err {
            SourceError::CouldNotCreateLock { path, .. } => assert_eq!(path, lock_path),
            other => panic!("expected CouldNotCreateLock, got {:?}", other),
        }
        // The pre-existing file is untouched.
        assert!(lock_path.exists());
    }

    #[test]
    fn test_drop_removes_lock() {
        let tmp = TempDir::new().unwrap();
        {
            let _lock = CacheLock::acquire(tmp.path()).unwrap();
            assert!(tmp.path().join("sm.lock").exists());
        }
        assert!(!tmp.path().join("sm.lock").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let _lock = CacheLock::acquire(tmp.path()).unwrap();
        let mode = fs::metadata(tmp.path().join("sm.lock"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
