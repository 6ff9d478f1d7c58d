//! Per-connection lock bookkeeping for `LOCK_STATE`/`BORROW_STATE[_Q]`/
//! `RETURN_STATE`/`UNLOCK_STATES`.

use shepherd_concurrency::lock::{lock_exclusive, lock_shared, try_lock_shared, ExclusiveLock, SharedLock};
use shepherd_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Which kind of lock, if any, a connection currently holds.
enum Held {
    Exclusive(ExclusiveLock),
    Shared(SharedLock),
}

/// One connection's lock state over a single state directory's lock
/// file. A fresh connection holds nothing.
pub struct ConnectionLocks {
    lock_path: PathBuf,
    held: Option<Held>,
}

impl ConnectionLocks {
    /// Track locks against `lock_path` (typically `<state dir>/lock`).
    pub fn new(lock_path: PathBuf) -> ConnectionLocks {
        ConnectionLocks {
            lock_path,
            held: None,
        }
    }

    /// Path of the lock file this registry guards.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// True if this connection currently holds any lock.
    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// `LOCK_STATE`: take the exclusive lock, blocking until available.
    pub fn lock_state(&mut self) -> Result<()> {
        let lock = lock_exclusive(&self.lock_path)?;
        self.held = Some(Held::Exclusive(lock));
        Ok(())
    }

    /// `BORROW_STATE`: take a shared lock, blocking until available.
    pub fn borrow_state(&mut self) -> Result<()> {
        let lock = lock_shared(&self.lock_path)?;
        self.held = Some(Held::Shared(lock));
        Ok(())
    }

    /// `BORROW_STATE_Q`: take a shared lock without blocking, returning
    /// `false` (mapped by the caller to `NO_SUCH_STATE`/`IN_PROGRESS`)
    /// if an exclusive holder is in the way.
    pub fn borrow_state_nonblocking(&mut self) -> Result<bool> {
        match try_lock_shared(&self.lock_path)? {
            Some(lock) => {
                self.held = Some(Held::Shared(lock));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `RETURN_STATE`/`UNLOCK_STATES`: release whatever this connection
    /// holds. Returns an error (mapped to `NO_BORROWED`) if nothing was
    /// held.
    pub fn release(&mut self) -> Result<()> {
        if self.held.take().is_none() {
            return Err(Error::InvalidTransition(
                "connection holds no lock to release".into(),
            ));
        }
        Ok(())
    }
}
