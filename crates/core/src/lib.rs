//! Core types shared across the Shepherd workspace.
//!
//! This crate defines the foundational, dependency-light data model of the
//! crawl state:
//!
//! - [`Footprint`]: the 256-bit URL identity used as the sort/merge key
//!   everywhere in the system.
//! - [`UrlState`]: the fixed-size per-URL record that makes up the `index`
//!   and `journal` files.
//! - [`Qkey`]: the host queueing key the reaper schedules on.
//! - [`Plan`] / [`PlanEntry`]: the planner's output shape.
//! - [`Checkpoint`]: the reap-cycle recovery point.
//! - [`Config`]: every tunable the daemon reads at startup, loaded once by
//!   the master process and threaded down to every stage.
//! - [`Error`]: the unified error type other crates convert into at their
//!   public boundaries.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod contrib;
pub mod error;
pub mod footprint;
pub mod plan;
pub mod qkey;
pub mod site;
pub mod url_state;

pub use checkpoint::Checkpoint;
pub use config::Config;
pub use contrib::ContribRecord;
pub use error::{Error, Result};
pub use footprint::Footprint;
pub use plan::{Plan, PlanEntry, PlanEntryFlags};
pub use qkey::{Channel, Qkey, Skey};
pub use site::Site;
pub use url_state::{Oid, UrlFlags, UrlKind, UrlState};
