//! Scheduling and locking primitives shared by the reaper and the
//! master loop.
//!
//! - [`lock`]: the `FileLock` abstraction over whole-file advisory locks
//!   (see `DESIGN.md` for why this replaces `fcntl` byte ranges).
//! - [`reaper`]: the qnode/qsite state machine, waiting/ready heaps, and
//!   `time_step` tick driving the reap job life cycle.
//! - [`queue`]: the bounded prefetch work queue.

#![warn(missing_docs)]

pub mod lock;
pub mod queue;
pub mod reaper;

pub use lock::FileLock;
pub use queue::{Job, JobOutcome, WorkQueue};
pub use reaper::{NodeState, Qsite, QsiteId, Scheduler, SiteState, RESOLVER_PRIORITY};
