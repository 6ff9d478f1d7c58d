//! # Shepherd
//!
//! The crawl-state daemon for the Holmes search engine: a master process
//! that drives one reap cycle at a time (plan, reap, merge, equiv, select,
//! record, sort) against an on-disk index of URL state, and serves a
//! control protocol over TCP so peers can borrow, mirror, or steer it.
//!
//! This crate is a thin facade over the workspace's internal crates, which
//! are not otherwise published. The runnable entry points live in
//! `shepherd-cli`'s binaries (`shep`, `shep-init`, `shep-urls`, ...); this
//! facade exists for embedding the daemon loop or the control client
//! directly into other Rust code.

pub use shepherd_core::{Config, Error, Footprint, Plan, Result, Site, UrlState};
pub use shepherd_engine::master::{spawn_loop, CycleDriver, MasterHandle, StartupMode, Watchdog};
pub use shepherd_server::flags::{DaemonFlags, SharedFlags};
pub use shepherd_wire::{Message, Mode, Payload, Reply, Request};
