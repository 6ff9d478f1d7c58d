//! The control-TCP server: authorizes and serves one connection at a time
//! over the request/reply protocol defined in `shepherd-wire`, translating
//! each request into the daemon-wide [`flags::DaemonFlags`] or a
//! [`lock_registry::ConnectionLocks`] action, and streaming `SEND_MODE`
//! sub-sessions straight off the on-disk state directory.
//!
//! - [`auth`]: IP-based authorization.
//! - [`flags`]: the `SET_*` daemon-wide toggle state.
//! - [`lock_registry`]: per-connection state-lock bookkeeping.
//! - [`dispatch`]: control-mode request routing.
//! - [`send_mode`]: the `SEND_MODE` sub-session's streaming requests.
//! - [`connection`]: one connection's full serve loop.
//! - [`listener`]: the TCP accept loop.

#![warn(missing_docs)]

pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod flags;
pub mod listener;
pub mod lock_registry;
pub mod send_mode;

pub use flags::{DaemonFlags, SharedFlags};
pub use lock_registry::ConnectionLocks;
