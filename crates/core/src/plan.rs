//! The planner's output shape.

use crate::footprint::Footprint;
use crate::qkey::Qkey;
use crate::url_state::Oid;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-entry plan flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct PlanEntryFlags: u8 {
        /// Entry represents a routine refresh, not a first fetch.
        const REFRESH = 1 << 0;
        /// Entry is a synthesized robots.txt request (site lacked a
        /// resolved robots OID at plan time).
        const SYNTH_ROBOTS = 1 << 1;
        /// Entry was picked early, ahead of its natural priority window.
        const ANTICIPATED = 1 << 2;
        /// Entry is older than `1.5 * refresh_cycle`.
        const OVER_AGED = 1 << 3;
        /// Entry is a site's `/robots.txt`.
        const ROBOTS = 1 << 4;
        /// Entry is `INIT | ROBOTS` sacrisimmus in origin.
        const SACRISIMMUS = 1 << 5;
    }
}

/// One fetch candidate within a site's plan block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    /// The URL's footprint, carried through so the reap/record stages
    /// can join a fetch outcome back to the index record it came from.
    pub fp: Footprint,
    /// Bucket id of the previous download, or `UNDEFINED` for a new URL.
    pub oid: Oid,
    /// Computed by `plan_gather_p`.
    pub priority: u32,
    /// Carried over from the index record.
    pub retry_count: u8,
    /// Carried over from the index record.
    pub weight: u8,
    /// See [`PlanEntryFlags`].
    pub flags: PlanEntryFlags,
    /// Carried over from the index record.
    pub section: u16,
    /// Carried over from the index record.
    pub area: u16,
}

/// A per-site block within the `plan` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanBlock {
    /// Queueing key this block will be scheduled under.
    pub qkey: Qkey,
    /// The site's robots.txt bucket id, if resolved at plan time.
    pub robot_oid: Oid,
    /// Politeness delay to apply between fetches on this qkey.
    pub delay_secs: u32,
    /// Fetch candidates, already sorted `priority desc` within the
    /// block.
    pub entries: Vec<PlanEntry>,
}

/// The full planner output: a sequence of per-site blocks.
pub type Plan = Vec<PlanBlock>;
