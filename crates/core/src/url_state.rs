//! The `url_state` record: the fixed-size per-URL record making up the
//! `index` and `journal` files.

use crate::footprint::Footprint;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Bucket id, or one of several sentinel values.
///
/// `oid` doubles as a domain-error code for zombies and as the server-key
/// value for `SKEY` records, so it's kept as a transparent `u32` newtype
/// rather than an enum — callers that know the record's [`UrlKind`]
/// interpret the raw value accordingly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Oid(pub u32);

impl Oid {
    /// No bucket assigned yet.
    pub const UNDEFINED: Oid = Oid(u32::MAX);
    /// Download failed with no more specific code.
    pub const ERROR: Oid = Oid(u32::MAX - 1);
    /// Bucket marked deleted in the bucket file.
    pub const DELETED: Oid = Oid(u32::MAX - 2);

    /// A raw bucket offset-derived oid (`offset >> 4`, since every bucket
    /// is 16-byte aligned).
    pub fn from_offset(offset: u64) -> Oid {
        Oid((offset >> 4) as u32)
    }

    /// The byte offset this oid addresses in the bucket file.
    pub fn to_offset(self) -> u64 {
        (self.0 as u64) << 4
    }

    /// True for any of the reserved sentinel values.
    pub fn is_sentinel(self) -> bool {
        matches!(self, Oid::UNDEFINED | Oid::ERROR | Oid::DELETED)
    }
}

bitflags! {
    /// Per-record flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct UrlFlags: u16 {
        /// Set on the handful of hand-seeded URLs a crawl starts from.
        const INIT = 1 << 0;
        /// This record is a site's `/robots.txt`.
        const ROBOTS = 1 << 1;
        /// No surviving reference to this URL was found during merge.
        const UNREF = 1 << 2;
        /// The equivalence stage needs this URL to survive (it's the
        /// canonical representative of a normalised-footprint group).
        const NEEDED_BY_EQ = 1 << 3;
        /// Re-fetch unconditionally next cycle, bypassing refresh timing.
        const REGATHER = 1 << 4;
        /// Originated from the contribution store and has not yet been
        /// materialised into a real bucket by the record stage.
        const CONTRIB = 1 << 5;
        /// `weight` was set explicitly rather than defaulted.
        const TRUE_WEIGHT = 1 << 6;
        /// Selected ahead of its natural priority by a manual override.
        const SELECT_PRIORITY = 1 << 7;

        /// `SACRED` records are never silently dropped.
        const SACRED = Self::INIT.bits() | Self::ROBOTS.bits() | Self::NEEDED_BY_EQ.bits();
        /// `SACRISIMMUS` records survive even proven nonexistent.
        const SACRISIMMUS = Self::INIT.bits() | Self::ROBOTS.bits();
    }
}

/// The record's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UrlKind {
    /// Known but not currently scheduled for fetching.
    Sleeping,
    /// Never successfully fetched.
    New,
    /// Last fetch succeeded.
    Ok,
    /// Last fetch permanently failed.
    Error,
    /// Synthetic per-site server-key record (`rest_fp == SKEY`).
    Skey,
    /// Last fetch failed transiently; will retry.
    TempError,
    /// Permanently broken, kept to suppress re-fetching until expiry.
    Zombie,
}

/// A fixed-shape per-URL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlState {
    /// URL identity.
    pub fp: Footprint,
    /// Bucket id, or a sentinel, or (for zombies) a domain-error code,
    /// or (for `Skey` records) the server-key value.
    pub oid: Oid,
    /// Seconds since epoch of the last successful probe.
    pub last_seen: u32,
    /// Consecutive soft failures since the last successful download.
    pub retry_count: u8,
    /// 8-bit selection weight.
    pub weight: u8,
    /// Union of [`UrlFlags`].
    pub flags: UrlFlags,
    /// Lifecycle state.
    pub kind: UrlKind,
    /// Whether this record has no fetch target (pure placeholder).
    pub no_target: bool,
    /// Observed (last-change .. last-check) interval, in configurable
    /// units (see `Config::stable_time_unit_secs`).
    pub stable_time: u16,
    /// Desired refreshes per global refresh cycle, `1..=255`.
    pub refresh_freq: u8,
    /// Last download duration in 0.1s units, or a temp-error marker
    /// (`0xf0 + min(retry_count, 15)`).
    pub download_time: u8,
    /// Classifier tag.
    pub section: u16,
    /// Classifier tag.
    pub area: u16,
}

/// `download_time` values `0xf0..=0xff` mean "this was a retry", encoding
/// `min(retry_count, 15)` in the low nibble.
const DOWNLOAD_TIME_RETRY_BASE: u8 = 0xf0;

impl UrlState {
    /// Construct a brand-new (`New`) record with minimal fields set.
    ///
    /// `flags` must not combine `SACRISIMMUS` with `Zombie` — a zombie
    /// never carries `SACRISIMMUS`, enforced here rather than left to
    /// caller discipline.
    pub fn new(fp: Footprint, weight: u8, flags: UrlFlags) -> Self {
        debug_assert!(
            !flags.contains(UrlFlags::SACRISIMMUS),
            "new() records should not start SACRISIMMUS without a completed fetch history"
        );
        UrlState {
            fp,
            oid: Oid::UNDEFINED,
            last_seen: 0,
            retry_count: 0,
            weight,
            flags,
            kind: UrlKind::New,
            no_target: false,
            stable_time: 0,
            refresh_freq: 1,
            download_time: 0,
            section: 0,
            area: 0,
        }
    }

    /// Build the synthetic per-site `SKEY` record.
    pub fn new_skey(site_fp: [u8; 16], skey_value: u32) -> Self {
        UrlState {
            fp: Footprint::skey_of_site(site_fp),
            oid: Oid(skey_value),
            last_seen: 0,
            retry_count: 0,
            weight: 0,
            flags: UrlFlags::empty(),
            kind: UrlKind::Skey,
            no_target: true,
            stable_time: 0,
            refresh_freq: 1,
            download_time: 0,
            section: 0,
            area: 0,
        }
    }

    /// Transition this record to `Zombie`, carrying a domain-error code
    /// as its `oid`. Panics (via `debug_assert`) if the record carries
    /// `SACRISIMMUS`, matching the invariant in §3.2: "A ZOMBIE never
    /// carries SACRISIMMUS" — sacrisimmus records must be cleared of
    /// that flag by the caller before zombifying, or kept alive instead.
    pub fn mark_zombie(&mut self, error_code: u32) {
        debug_assert!(
            !self.flags.contains(UrlFlags::SACRISIMMUS),
            "SACRISIMMUS records must never become zombies"
        );
        self.kind = UrlKind::Zombie;
        self.oid = Oid(error_code);
    }

    /// True if this record must never be silently dropped.
    pub fn is_sacred(&self) -> bool {
        self.flags.intersects(UrlFlags::SACRED)
    }

    /// True if this record survives even after it's proven nonexistent.
    pub fn is_sacrisimmus(&self) -> bool {
        self.flags.intersects(UrlFlags::SACRISIMMUS)
    }

    /// Encode a successful download's duration, in 0.1s units, clamped
    /// to the representable range, 0xef)`).
    pub fn encode_download_time(tenths_of_second: u32) -> u8 {
        tenths_of_second.min(0xef) as u8
    }

    /// Encode a retry's `download_time` marker.
    pub fn encode_retry_marker(retry_count: u8) -> u8 {
        DOWNLOAD_TIME_RETRY_BASE + retry_count.min(15)
    }

    /// True if `download_time` encodes a retry rather than a real
    /// duration.
    pub fn download_time_is_retry(&self) -> bool {
        self.download_time >= DOWNLOAD_TIME_RETRY_BASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_from_offset_roundtrips_on_16_byte_boundaries() {
        let oid = Oid::from_offset(16 * 7);
        assert_eq!(oid.0, 7);
        assert_eq!(oid.to_offset(), 16 * 7);
    }

    #[test]
    fn sentinel_oids_are_flagged() {
        assert!(Oid::UNDEFINED.is_sentinel());
        assert!(Oid::ERROR.is_sentinel());
        assert!(Oid::DELETED.is_sentinel());
        assert!(!Oid(42).is_sentinel());
    }

    #[test]
    fn sacred_subsumes_init_robots_needed_by_eq() {
        assert!(UrlFlags::INIT.intersects(UrlFlags::SACRED));
        assert!(UrlFlags::ROBOTS.intersects(UrlFlags::SACRED));
        assert!(UrlFlags::NEEDED_BY_EQ.intersects(UrlFlags::SACRED));
        assert!(!UrlFlags::CONTRIB.intersects(UrlFlags::SACRED));
    }

    #[test]
    fn sacrisimmus_excludes_needed_by_eq() {
        assert!(!UrlFlags::NEEDED_BY_EQ.intersects(UrlFlags::SACRISIMMUS));
        assert!(UrlFlags::INIT.intersects(UrlFlags::SACRISIMMUS));
    }

    #[test]
    #[should_panic]
    fn mark_zombie_panics_on_sacrisimmus_record_in_debug() {
        let fp = Footprint::new([1u8; 16], [2u8; 16]);
        let mut rec = UrlState::new(fp, 10, UrlFlags::empty());
        rec.flags |= UrlFlags::ROBOTS;
        rec.mark_zombie(2308);
    }

    #[test]
    fn retry_marker_encodes_in_high_nibble_range() {
        let m = UrlState::encode_retry_marker(3);
        assert_eq!(m, 0xf3);
        assert!(UrlState {
            fp: Footprint::new([0; 16], [0; 16]),
            oid: Oid::UNDEFINED,
            last_seen: 0,
            retry_count: 3,
            weight: 0,
            flags: UrlFlags::empty(),
            kind: UrlKind::TempError,
            no_target: false,
            stable_time: 0,
            refresh_freq: 1,
            download_time: m,
            section: 0,
            area: 0,
        }
        .download_time_is_retry());
    }

    #[test]
    fn retry_marker_clamps_at_15() {
        assert_eq!(UrlState::encode_retry_marker(200), 0xff);
    }

    #[test]
    fn download_time_clamps_at_0xef() {
        assert_eq!(UrlState::encode_download_time(1_000_000), 0xef);
    }
}
