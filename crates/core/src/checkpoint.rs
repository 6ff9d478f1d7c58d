//! Reap-cycle checkpoints.

use serde::{Deserialize, Serialize};

/// A consistent recovery point across the four append-only reap-cycle
/// files, written in the order `buckets_flush → journal_flush →
/// contrib_flush → urls_flush → checkpoint append`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Wall-clock seconds since epoch when this checkpoint was taken.
    pub time: u32,
    /// Bucket file size at checkpoint time.
    pub buckets_pos: u64,
    /// Journal file size at checkpoint time.
    pub journal_pos: u64,
    /// Contribution file size at checkpoint time.
    pub contrib_pos: u64,
    /// URL database file size at checkpoint time.
    pub urls_pos: u64,
}

impl Checkpoint {
    /// The zero checkpoint, representing "nothing written yet".
    pub const ZERO: Checkpoint = Checkpoint {
        time: 0,
        buckets_pos: 0,
        journal_pos: 0,
        contrib_pos: 0,
        urls_pos: 0,
    };
}
