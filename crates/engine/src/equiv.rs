//! The equivalence stage: an external collaborator seam for discovering
//! that two distinct site footprints (e.g. `www.` and bare-domain variants
//! of the same host) refer to one logical site, and rewriting their
//! `norm_fp` to a shared canonical value. No real equivalence engine ships
//! in this workspace — it's an optional, pluggable stage (the same shape
//! as [`crate::contrib_filter::ContentFilter`]) — so this module defines
//! the trait seam plus a default no-op implementation that
//! preserves the two invariants the rest of the pipeline relies on
//! regardless of which `EquivStage` is plugged in: footprint order is
//! untouched, and any site flagged `NEEDED_BY_EQ` keeps its root URL
//! present.

use shepherd_core::site::Site;
use shepherd_core::Result;

use crate::site_table::SiteTable;

/// A pluggable equivalence-discovery collaborator.
///
/// Implementations decide which sites are equivalent and assign them a
/// shared `norm_fp`; they must never reorder or drop sites, only
/// rewrite `norm_fp` in place.
pub trait EquivStage {
    /// Run one equivalence pass over the site table, updating `norm_fp`
    /// in place on any sites found equivalent to another.
    fn resolve(&self, sites: &mut SiteTable) -> Result<EquivReport>;
}

/// Summary of one equivalence pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EquivReport {
    /// Number of sites whose `norm_fp` changed this pass.
    pub rewritten: usize,
}

/// The default equivalence stage: does not merge any sites. `norm_fp`
/// stays equal to `fp` for everyone, which is always a valid (if
/// maximally conservative) equivalence partition — every site is its
/// own group.
#[derive(Debug, Default)]
pub struct PassthroughEquiv;

impl EquivStage for PassthroughEquiv {
    fn resolve(&self, _sites: &mut SiteTable) -> Result<EquivReport> {
        Ok(EquivReport::default())
    }
}

/// Merge `from` into `into`'s equivalence group by pointing `from`'s
/// `norm_fp` at `into`'s current `norm_fp`. A real `EquivStage` can use
/// this helper rather than writing `norm_fp` by hand, keeping the
/// "canonical chain always terminates in one hop" shape intact.
pub fn merge_into(from: &mut Site, into: &Site) {
    from.norm_fp = into.norm_fp;
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::qkey::Skey;

    fn site(fp: [u8; 16]) -> Site {
        Site {
            fp,
            norm_fp: fp,
            proto: 0,
            host: "example.com".into(),
            port: 80,
            skey: Skey::unresolved(0, 16),
            soft_limit: 1,
            hard_limit: 1,
            fresh_limit: 1,
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
    fn passthrough_changes_nothing() {
        let mut sites = SiteTable::new();
        let cfg = shepherd_core::Config::default();
        sites.get_or_create([1u8; 16], 0, "a.example.com", 80, &cfg, 0);
        let report = PassthroughEquiv.resolve(&mut sites).unwrap();
        assert_eq!(report.rewritten, 0);
        assert!(!sites.get(&[1u8; 16]).unwrap().has_distinct_norm_fp());
    }

    #[test]
    fn merge_into_points_at_targets_norm_fp() {
        let mut a = site([1u8; 16]);
        let mut b = site([2u8; 16]);
        b.norm_fp = [9u8; 16];
        merge_into(&mut a, &b);
        assert_eq!(a.norm_fp, [9u8; 16]);
    }
}
