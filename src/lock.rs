//! Advisory file lock on a vector store directory.
//!
//! Uses flock() so that only one process mutates a store at a time. Readers
//! do not lock; they load whatever `vectors.bin` was last renamed into place.
//! The lock is released when the guard drops or the process dies.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::errors::{OragError, Result};
use crate::semantic::storage::VectorStorageError;

/// Lock file name placed in the store directory
const LOCK_FILE_NAME: &str = "orag.lock";

/// A held writer lock that releases on drop
pub struct StoreLock {
    #[cfg_attr(not(unix), allow(dead_code))]
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take the writer lock on `store_dir` without waiting.
    ///
    /// Fails with `Locked` if another process holds it.
    pub fn try_acquire(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| OragError::StoreUnavailable(VectorStorageError::Io(e)))?;

        match Self::try_lock_exclusive(&file) {
            Ok(()) => {
                log::debug!("Acquired store lock {}", path.display());
                Ok(StoreLock { file, path })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(OragError::Locked(format!(
                "{} is held by another process (sync already running?)",
                path.display()
            ))),
            Err(e) => Err(OragError::StoreUnavailable(VectorStorageError::Io(e))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn try_lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EAGAIN)
            {
                return Err(io::Error::new(io::ErrorKind::WouldBlock, err));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock_exclusive(_file: &File) -> io::Result<()> {
        // no advisory locking on this platform
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for StoreLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // Release the lock - ignore errors on drop
        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();

        // First lock should succeed
        let lock1 = StoreLock::try_acquire(dir.path());
        assert!(lock1.is_ok(), "First lock should succeed");

        // Second lock should fail (non-blocking)
        let lock2 = StoreLock::try_acquire(dir.path());
        assert!(matches!(lock2, Err(OragError::Locked(_))));

        drop(lock1);

        let lock3 = StoreLock::try_acquire(dir.path());
        assert!(lock3.is_ok(), "Third lock should succeed after release");
    }

    #[test]
    fn test_lock_file_location() {
        let dir = tempfile::tempdir().unwrap();
        let lock = StoreLock::try_acquire(dir.path()).unwrap();
        assert_eq!(lock.path(), dir.path().join(LOCK_FILE_NAME));
        assert!(lock.path().exists());
    }

    #[test]
    fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = StoreLock::try_acquire(&dir.path().join("absent"));
        assert!(matches!(result, Err(OragError::StoreUnavailable(_))));
    }
}
