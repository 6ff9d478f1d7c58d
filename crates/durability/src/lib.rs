//! Checkpointing and crash recovery for a Shepherd state directory.
//!
//! - [`checkpoint`]: the append-only checkpoint log, one CRC-checked
//!   record per `(buckets_flush, journal_flush, contrib_flush, urls_flush)`
//!   quadruple.
//! - [`recovery`]: replaying the journal past the last checkpoint back
//!   into the index, and rolling every reap-cycle file back to a prior
//!   checkpoint's recorded lengths.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod recovery;

pub use checkpoint::CheckpointLog;
pub use recovery::{replay_journal_into_index, rollback_to_checkpoint, CheckpointedFiles};
