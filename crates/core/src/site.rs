//! Per-site persistent records. The site *table* (the in-memory hash,
//! persistence, and qkey/channel assignment logic) lives in
//! `shepherd-engine::site_table`; this module only defines the record shape
//! so lower crates (storage's `sites` file codec) don't need to depend on
//! the engine crate.

use crate::qkey::{Channel, Qkey, Skey};
use serde::{Deserialize, Serialize};

/// Refresh-schema index selecting which row of
/// `Config::refresh_schemas` governs this site's refresh-frequency
/// ceiling.
pub type RefreshSchema = u8;

/// A site's persistent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    /// MD5 of `(protocol, port, host)`; the site table's hash key.
    pub fp: [u8; 16],
    /// Normalised footprint assigned by the equivalence stage; starts
    /// equal to `fp` until `equiv` rewrites it.
    pub norm_fp: [u8; 16],
    /// `0` = http, `1` = https.
    pub proto: u8,
    /// Hostname, NUL-terminated on disk.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Current resolved server key (or a reserved pseudo-skey).
    pub skey: Skey,
    /// Soft per-site URL limit (select stage may SLEEP past this).
    pub soft_limit: u32,
    /// Hard per-site URL limit (select stage DISCARDs past this).
    pub hard_limit: u32,
    /// Limit on URLs considered "fresh" for reporting purposes.
    pub fresh_limit: u32,
    /// Minimum politeness delay between fetches, in seconds.
    pub min_delay: u32,
    /// Added to a URL's plan priority once it's in the refresh band,
    /// for a site with a real, resolved skey.
    pub queue_bonus: u32,
    /// Prefer this site when selecting (`0`/`1`, config-set). Merge
    /// propagates a nonzero value into every one of the site's records
    /// as `UrlFlags::SELECT_PRIORITY`; select's effective weight reads
    /// that per-record flag, not this field directly.
    pub select_bonus: u32,
    /// Maximum concurrent connections / channels for this site.
    pub max_conn: u8,
    /// When true, every select/merge transition is logged to
    /// `state-log`.
    pub monitor: bool,
    /// Row index into `Config::refresh_schemas`.
    pub refresh_schema: RefreshSchema,
    /// Additive boost applied when computing the refresh-frequency
    /// ceiling.
    pub refresh_boost: u8,
    /// Site rejected outright by the content filter at load time
    /// (`SITE_REJECTED`); such sites are skipped by the planner entirely.
    pub rejected: bool,

    /// Running count of `OK`/`Sleeping`-but-live URLs, maintained by
    /// select.
    pub num_active: u32,
    /// Running count of `Sleeping` (soft-limited) URLs.
    pub num_inactive: u32,
    /// Running count of URLs considered fresh.
    pub num_fresh: u32,
}

impl Site {
    /// Pack this site's current qkey for the given channel.
    pub fn qkey(&self, channel: Channel) -> Qkey {
        Qkey::new(channel, self.port, self.skey)
    }

    /// True once `equiv` has assigned a normalised footprint different
    /// from the raw one.
    pub fn has_distinct_norm_fp(&self) -> bool {
        self.norm_fp != self.fp
    }

    /// True if this site currently has a real (non-pseudo) skey, which
    /// gates the site-wide planner priority bonus.
    pub fn has_real_skey(&self) -> bool {
        self.skey.is_resolved()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Site {
        Site {
            fp: [1u8; 16],
            norm_fp: [1u8; 16],
            proto: 0,
            host: "www.example.com".to_string(),
            port: 80,
            skey: Skey::unresolved(0, 16),
            soft_limit: 1000,
            hard_limit: 2000,
            fresh_limit: 500,
            min_delay: 1,
            queue_bonus: 0,
            select_bonus: 0,
            max_conn: 1,
            monitor: false,
            refresh_schema: 0,
            refresh_boost: 0,
            rejected: false,
            num_active: 0,
            num_inactive: 0,
            num_fresh: 0,
        }
    }

    #[test]
    fn qkey_uses_sites_port_and_skey() {
        let site = sample();
        let q = site.qkey(0);
        assert_eq!(q.port(), 80);
        assert_eq!(q.skey(), site.skey);
    }

    #[test]
    fn unresolved_site_has_no_real_skey() {
        assert!(!sample().has_real_skey());
    }

    #[test]
    fn fresh_norm_fp_equals_fp() {
        assert!(!sample().has_distinct_norm_fp());
    }
}
