//! Phase orchestration: the stages that turn a `plan` into a merged,
//! selected, recorded, sorted next generation of the index.
//!
//! - [`site_table`]: the in-memory site hash and its `sites`-file I/O.
//! - [`contrib_filter`]: contribution verification and dedup.
//! - [`planner`]: `plan_gather_p` and the three-budget planning walk.
//! - [`reap`]: the job life cycle driving the concurrency scheduler.
//! - [`merge`]: contribution/index union into the next generation.
//! - [`equiv`]: the equivalence-stage collaborator seam.
//! - [`select`]: the OK/SLEEP/DISCARD limiter.
//! - [`record`]: materialising contributions into real buckets.
//! - [`sort`]: the footprint unique-key sort stage.
//! - [`master`]: the phase sequencer driving one full reap cycle.
//! - [`manual`]: manual-control selectors used by CLI tools.

#![warn(missing_docs)]

pub mod contrib_filter;
pub mod equiv;
pub mod manual;
pub mod master;
pub mod merge;
pub mod planner;
pub mod reap;
pub mod record;
pub mod select;
pub mod site_table;
pub mod sort;

pub use contrib_filter::{ContentFilter, FilterVerdict};
pub use equiv::EquivStage;
pub use manual::UrlSet;
pub use planner::Planner;
pub use reap::Gatherer;
pub use select::{Disposition, SelectOutcome};
pub use site_table::SiteTable;
