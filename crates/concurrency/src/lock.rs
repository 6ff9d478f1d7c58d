//! Ownership/lifecycle locking over a state directory. The original's
//! `fcntl` byte-range locks have no first-class safe-Rust equivalent, so
//! this is modeled as whole-file advisory locking via [`fs2`] — a
//! deliberate simplification recorded as an Open Question resolution in
//! `DESIGN.md`. Byte-range locking let multiple cooperating processes lock
//! disjoint regions of one file; here, anything that needed a sub-range
//! lock instead gets its own lock file under the state directory (e.g. a
//! separate `reap.lock` next to `buckets.lock`), which preserves "can two
//! collaborators hold unrelated locks concurrently" without needing byte
//! ranges.

use fs2::FileExt;
use shepherd_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// A held advisory lock on one file. Released on drop.
pub trait FileLock: Send {
    /// Path of the locked file.
    fn path(&self) -> &Path;
}

/// Acquire an exclusive advisory lock on `path`, creating the file if
/// needed. Blocks the calling thread until the lock is available.
pub fn lock_exclusive(path: &Path) -> Result<ExclusiveLock> {
    let file = OpenOptions::new().create(true).write(true).open(path)?;
    file.lock_exclusive().map_err(|e| {
        Error::InvalidTransition(format!("failed to lock {}: {e}", path.display()))
    })?;
    Ok(ExclusiveLock {
        file,
        path: path.to_path_buf(),
    })
}

/// Attempt to acquire an exclusive advisory lock on `path` without
/// blocking, returning `Ok(None)` if another process holds it.
pub fn try_lock_exclusive(path: &Path) -> Result<Option<ExclusiveLock>> {
    let file = OpenOptions::new().create(true).write(true).open(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(ExclusiveLock {
            file,
            path: path.to_path_buf(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(Error::InvalidTransition(format!(
            "failed to lock {}: {e}",
            path.display()
        ))),
    }
}

/// Acquire a shared (read) advisory lock on `path`, blocking until
/// available. Used by `BORROW_STATE` readers that must coexist with
/// each other but not with an exclusive writer.
pub fn lock_shared(path: &Path) -> Result<SharedLock> {
    let file = OpenOptions::new().create(true).write(true).open(path)?;
    file.lock_shared().map_err(|e| {
        Error::InvalidTransition(format!("failed to lock {}: {e}", path.display()))
    })?;
    Ok(SharedLock {
        file,
        path: path.to_path_buf(),
    })
}

/// An exclusively held advisory lock.
pub struct ExclusiveLock {
    file: File,
    path: PathBuf,
}

impl FileLock for ExclusiveLock {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Attempt to acquire a shared advisory lock on `path` without
/// blocking, returning `Ok(None)` if an exclusive holder is in the way.
pub fn try_lock_shared(path: &Path) -> Result<Option<SharedLock>> {
    let file = OpenOptions::new().create(true).write(true).open(path)?;
    match file.try_lock_shared() {
        Ok(()) => Ok(Some(SharedLock {
            file,
            path: path.to_path_buf(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(Error::InvalidTransition(format!(
            "failed to lock {}: {e}",
            path.display()
        ))),
    }
}

/// A shared (read) advisory lock.
pub struct SharedLock {
    file: File,
    path: PathBuf,
}

impl FileLock for SharedLock {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SharedLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
