//! On-disk storage formats for a Shepherd state directory.
//!
//! - [`bucket`]: the append-only, oid-addressed blob file.
//! - [`state_dir`]: state-directory layout, `params`, atomic replace, and
//!   the `control` phase file.
//! - [`index`]: the packed `url_state` array making up `index` and
//!   `journal`.
//! - [`contrib_store`]: the append-only contribution queue and its
//!   in-memory dedup hash.
//! - [`urldb`]: the optional URL database log and sorted derivative.
//! - [`sites_file`]: the `sites` file codec.
//! - [`plan_file`]: the `plan` file codec.
//! - [`sort`]: the abstract external-sort interface.
//! - [`state_log`]: optional monitored-site transition log.

#![warn(missing_docs)]

pub mod bucket;
pub mod contrib_store;
pub mod index;
pub mod plan_file;
pub mod sites_file;
pub mod sort;
pub mod state_dir;
pub mod state_log;
pub mod urldb;

pub use bucket::{BucketHeader, BucketStore, BucketType, ShakeAction};
pub use contrib_store::ContribStore;
pub use index::UrlIndex;
pub use sort::{ExternalSorter, SortOrder};
pub use state_dir::{Params, Phase, StateDir};
