//! The boolean switches `SET_CLEANUP`/`SET_IDLE`/`SET_PRIVATE`/
//! `SET_DELETE_OLD` flip, shared between every connection and the master
//! loop via an `Arc`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Daemon-wide state toggled by control requests and read back by the
/// master loop between cycles.
#[derive(Debug, Default)]
pub struct DaemonFlags {
    cleanup_pending: AtomicBool,
    idle_pending: AtomicBool,
    private: AtomicBool,
    delete_old_pending: AtomicBool,
}

/// A shared handle to one daemon's [`DaemonFlags`].
pub type SharedFlags = Arc<DaemonFlags>;

impl DaemonFlags {
    /// A fresh, all-clear flag set.
    pub fn new() -> SharedFlags {
        Arc::new(DaemonFlags::default())
    }

    /// `SET_CLEANUP`.
    pub fn set_cleanup_pending(&self, on: bool) {
        self.cleanup_pending.store(on, Ordering::SeqCst);
    }

    /// Whether a cleanup has been requested.
    pub fn cleanup_pending(&self) -> bool {
        self.cleanup_pending.load(Ordering::SeqCst)
    }

    /// `SET_IDLE`.
    pub fn set_idle_pending(&self, on: bool) {
        self.idle_pending.store(on, Ordering::SeqCst);
    }

    /// Whether the master should idle after its current cycle.
    pub fn idle_pending(&self) -> bool {
        self.idle_pending.load(Ordering::SeqCst)
    }

    /// `SET_PRIVATE`.
    pub fn set_private(&self, on: bool) {
        self.private.store(on, Ordering::SeqCst);
    }

    /// Whether `BORROW_STATE`/`SEND_MODE` from peers is currently refused.
    pub fn is_private(&self) -> bool {
        self.private.load(Ordering::SeqCst)
    }

    /// `SET_DELETE_OLD`.
    pub fn set_delete_old_pending(&self, on: bool) {
        self.delete_old_pending.store(on, Ordering::SeqCst);
    }

    /// Whether the `previous` state directory should be deleted once
    /// it's safe to do so.
    pub fn delete_old_pending(&self) -> bool {
        self.delete_old_pending.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_clear_and_toggle_independently() {
        let flags = DaemonFlags::new();
        assert!(!flags.cleanup_pending());
        flags.set_cleanup_pending(true);
        assert!(flags.cleanup_pending());
        assert!(!flags.is_private());
    }
}
