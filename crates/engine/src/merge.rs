//! The merge stage: folds the contribution store into the index as new
//! `NEW` records, synthesizes `AutoGoRoot` candidates, and resolves
//! duplicate contributions within one cycle by keeping the highest-weight
//! copy (`filtering_cmp`).

use shepherd_core::contrib::{ContribFlags, ContribRecord};
use shepherd_core::footprint::{Footprint, ROOT};
use shepherd_core::url_state::{Oid, UrlFlags, UrlKind};
use shepherd_core::{Config, Result, Site, UrlState};
use shepherd_storage::state_log::{StateLog, StateLogEntry};
use std::collections::HashMap;

use crate::site_table::SiteTable;

/// Counters from one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Contributions read from the store.
    pub seen: u64,
    /// Contributions folded into an already-seen footprint this pass
    /// (kept the higher-weight copy, dropped the rest).
    pub duplicates_folded: u64,
    /// Contributions that already had an index record (skipped as
    /// pure duplicates of existing URLs).
    pub already_indexed: u64,
    /// Brand-new index records created.
    pub new_records: u64,
    /// Synthetic `AutoGoRoot` entries synthesized.
    pub auto_go_root_added: u64,
}

/// `filtering_cmp`: resolves two contributions for the same footprint
/// by keeping the one with the higher weight, and on a tie, the one
/// whose flags carry `REGATHER`.
pub fn filtering_cmp(a: &ContribRecord, b: &ContribRecord) -> std::cmp::Ordering {
    a.weight
        .cmp(&b.weight)
        .then_with(|| {
            a.flags
                .contains(ContribFlags::REGATHER)
                .cmp(&b.flags.contains(ContribFlags::REGATHER))
        })
}

/// Synthesize the `AutoGoRoot` candidate for a site: its root page
/// (`/`), at maximum weight, flagged so merge always prioritises it.
pub fn auto_go_root_candidate(site: &Site) -> ContribRecord {
    let url = format!(
        "{}://{}{}/",
        if site.proto == 1 { "https" } else { "http" },
        site.host,
        if (site.proto == 0 && site.port != 80) || (site.proto == 1 && site.port != 443) {
            format!(":{}", site.port)
        } else {
            String::new()
        }
    );
    ContribRecord {
        fp: Footprint::new(site.fp, ROOT),
        area: 0,
        url_len: url.len() as u16,
        weight: 0xff,
        section: 0,
        flags: ContribFlags::AUTO_GO_ROOT,
        url,
    }
}

/// Sort contributions by `(fp, weight desc)`, the order that makes grouping
/// duplicate footprints a single linear pass.
pub fn sort_candidates(records: &mut [ContribRecord]) {
    records.sort_by(|a, b| a.fp.cmp(&b.fp).then_with(|| b.weight.cmp(&a.weight)));
}

/// Fold a contribution into a `NEW` index record, carrying over
/// `REGATHER` from the contribution's flags and setting
/// `SELECT_PRIORITY` from the owning site's `select_bonus` toggle.
fn new_record(rec: &ContribRecord, site: Option<&Site>) -> UrlState {
    let mut flags = UrlFlags::CONTRIB;
    if rec.flags.contains(ContribFlags::REGATHER) {
        flags |= UrlFlags::REGATHER;
    }
    if site.map(|s| s.select_bonus != 0).unwrap_or(false) {
        flags |= UrlFlags::SELECT_PRIORITY;
    }
    let mut state = UrlState::new(rec.fp, rec.weight, flags);
    state.section = rec.section;
    state.area = rec.area;
    state
}

/// Run one merge pass: synthesize `AutoGoRoot` candidates for every
/// site with `Config::auto_go_root` set, sort the combined candidate
/// set by `(fp, weight desc)`, fold duplicate footprints via
/// [`filtering_cmp`], skip footprints already present in
/// `existing_fps`, and return the new records to append plus the
/// pass's [`MergeStats`]. Monitored sites get a `state-log` row per
/// new record.
pub fn merge(
    contributions: impl Iterator<Item = Result<ContribRecord>>,
    sites: &SiteTable,
    existing_fps: &std::collections::HashSet<Footprint>,
    cfg: &Config,
    mut state_log: Option<&mut StateLog>,
) -> Result<(Vec<UrlState>, MergeStats)> {
    let mut stats = MergeStats::default();
    let mut candidates: Vec<ContribRecord> = Vec::new();

    for rec in contributions {
        let rec = rec?;
        stats.seen += 1;
        candidates.push(rec);
    }

    if cfg.auto_go_root {
        for site in sites.iter() {
            if site.rejected {
                continue;
            }
            let root_fp = Footprint::new(site.fp, ROOT);
            if existing_fps.contains(&root_fp) {
                continue;
            }
            candidates.push(auto_go_root_candidate(site));
            stats.auto_go_root_added += 1;
        }
    }

    sort_candidates(&mut candidates);

    let mut winners: HashMap<Footprint, ContribRecord> = HashMap::new();
    for rec in candidates {
        match winners.get(&rec.fp) {
            Some(existing) if filtering_cmp(existing, &rec) != std::cmp::Ordering::Less => {
                stats.duplicates_folded += 1;
            }
            Some(_) => {
                stats.duplicates_folded += 1;
                winners.insert(rec.fp, rec);
            }
            None => {
                winners.insert(rec.fp, rec);
            }
        }
    }

    let mut new_records = Vec::new();
    let mut fps: Vec<Footprint> = winners.keys().copied().collect();
    fps.sort();
    for fp in fps {
        if existing_fps.contains(&fp) {
            stats.already_indexed += 1;
            continue;
        }
        let rec = &winners[&fp];
        let site = sites.get(&fp.site_fp);
        let state = new_record(rec, site);
        stats.new_records += 1;

        if let Some(site) = site {
            if site.monitor {
                if let Some(log) = state_log.as_deref_mut() {
                    log.append(&StateLogEntry {
                        fp,
                        source: "merge".to_string(),
                        action: "new".to_string(),
                        arg1: state.weight as i64,
                        arg2: 0,
                    })?;
                }
            }
        }
        new_records.push(state);
    }

    Ok((new_records, stats))
}

/// True if a record should be dropped as unreferenced.
pub fn should_drop_unreferenced(rec: &UrlState) -> bool {
    rec.flags.contains(UrlFlags::UNREF) && !rec.is_sacred()
}

/// `Oid` reserved for records the merge stage re-flags as duplicates
/// of an `AutoGoRoot` insertion rather than deletes outright, so a
/// later recovery pass can still locate them by oid if needed.
pub const MERGE_DUPLICATE_OID: Oid = Oid::DELETED;

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::qkey::Skey;
    use tempfile::tempdir;

    fn site(fp: [u8; 16], host: &str) -> Site {
        Site {
            fp,
            norm_fp: fp,
            proto: 0,
            host: host.into(),
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

    fn contrib(fp: Footprint, weight: u8) -> ContribRecord {
        ContribRecord {
            fp,
            area: 0,
            url_len: 1,
            weight,
            section: 0,
            flags: ContribFlags::empty(),
            url: "x".to_string(),
        }
    }

    #[test]
    fn higher_weight_duplicate_wins() {
        let fp = Footprint::new([1u8; 16], [2u8; 16]);
        let mut sites = SiteTable::new();
        sites.get_or_create([1u8; 16], 0, "a.example.com", 80, &Config::default(), 0);
        let cfg = Config {
            auto_go_root: false,
            ..Config::default()
        };
        let input = vec![Ok(contrib(fp, 10)), Ok(contrib(fp, 200))];
        let (records, stats) =
            merge(input.into_iter(), &sites, &Default::default(), &cfg, None).unwrap();
        assert_eq!(stats.duplicates_folded, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].weight, 200);
    }

    #[test]
    fn auto_go_root_inserted_when_missing_and_enabled() {
        let mut sites = SiteTable::new();
        sites.get_or_create([2u8; 16], 0, "b.example.com", 80, &Config::default(), 0);
        let cfg = Config::default();
        let (records, stats) = merge(
            std::iter::empty(),
            &sites,
            &Default::default(),
            &cfg,
            None,
        )
        .unwrap();
        assert_eq!(stats.auto_go_root_added, 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fp.rest_fp, ROOT);
    }

    #[test]
    fn already_indexed_footprints_are_skipped() {
        let fp = Footprint::new([3u8; 16], [4u8; 16]);
        let mut sites = SiteTable::new();
        sites.get_or_create([3u8; 16], 0, "c.example.com", 80, &Config::default(), 0);
        let cfg = Config {
            auto_go_root: false,
            ..Config::default()
        };
        let mut existing = std::collections::HashSet::new();
        existing.insert(fp);
        let (records, stats) = merge(
            vec![Ok(contrib(fp, 10))].into_iter(),
            &sites,
            &existing,
            &cfg,
            None,
        )
        .unwrap();
        assert_eq!(stats.already_indexed, 1);
        assert!(records.is_empty());
    }

    #[test]
    fn select_bonus_site_propagates_select_priority_flag() {
        let fp = Footprint::new([7u8; 16], [8u8; 16]);
        let mut sites = SiteTable::new();
        let s = sites.get_or_create([7u8; 16], 0, "e.example.com", 80, &Config::default(), 0);
        s.select_bonus = 1;
        let cfg = Config {
            auto_go_root: false,
            ..Config::default()
        };
        let (records, _stats) = merge(
            vec![Ok(contrib(fp, 10))].into_iter(),
            &sites,
            &Default::default(),
            &cfg,
            None,
        )
        .unwrap();
        assert!(records[0].flags.contains(UrlFlags::SELECT_PRIORITY));
    }

    #[test]
    fn monitored_site_gets_a_state_log_row() {
        let fp = Footprint::new([5u8; 16], [6u8; 16]);
        let mut sites = SiteTable::new();
        let s = sites.get_or_create([5u8; 16], 0, "d.example.com", 80, &Config::default(), 0);
        s.monitor = true;
        let cfg = Config {
            auto_go_root: false,
            ..Config::default()
        };
        let dir = tempdir().unwrap();
        let mut log = StateLog::open(&dir.path().join("state-log")).unwrap();
        merge(
            vec![Ok(contrib(fp, 10))].into_iter(),
            &sites,
            &Default::default(),
            &cfg,
            Some(&mut log),
        )
        .unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
    }
}
