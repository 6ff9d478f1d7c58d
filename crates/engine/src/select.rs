//! The select stage: the limiter deciding which index records survive into
//! the next generation as active/sleeping/zombie, which are discarded
//! outright, and what per-qkey refresh frequency ceiling each survivor
//! gets for the next cycle.
//!
//! Limiting cascades through five levels in a fixed order — fresh limit,
//! site, qkey, section, global performance — each level only ever
//! *downgrading* the action (`Ok` -> `Sleep` -> `Discard`), never
//! upgrading it. `Cause` records whichever level last touched the
//! action. Per-section space budgets and the global disk-space budget
//! aren't modeled (no byte-accounting concept exists elsewhere in this
//! crate), so section/space limiting never fires; their counters are
//! still maintained, and the section *bonus* (`select_weight`'s last
//! term) is fully wired up.

use crate::site_table::SiteTable;
use shepherd_core::footprint::Footprint;
use shepherd_core::url_state::{Oid, UrlFlags, UrlKind};
use shepherd_core::{Config, Error, Result, Site, UrlState};
use shepherd_storage::state_log::{StateLog, StateLogEntry};
use std::collections::{HashMap, HashSet};

/// The select stage's verdict on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Record kept active, eligible for scheduling next cycle.
    Ok,
    /// Record kept but not scheduled until some level drops back under
    /// its limit.
    Sleep,
    /// Record dropped from the index entirely.
    Discard,
}

/// Why a [`Disposition`] was chosen, surfaced for `state-log` rows and
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// No level's limit was crossed.
    WithinLimits,
    /// Record carries `SACRED`/`SACRISIMMUS` and is exempt from normal
    /// limiting.
    Sacred,
    /// A zombie whose suppression window hasn't expired yet.
    ZombieSuppressed,
    /// A zombie whose suppression window expired.
    ZombieExpired,
    /// A redirect target that stayed unresolved past the configured
    /// timeout, converted to a zombie with error code 2308.
    RedirectTimedOut,
    /// An `ERROR` record with no surviving reference, dropped outright.
    Unreferenced,
    /// Over the site's fresh-record limit.
    FreshLimit,
    /// Over the site's soft/hard active-record limit.
    Site,
    /// Over the qkey's soft/hard active-record limit.
    Qkey,
    /// Over the section's soft/hard active-record limit.
    Section,
    /// Over the global performance soft/hard active-record limit.
    Perf,
}

/// One record's full select outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOutcome {
    /// Kept/slept/dropped.
    pub disposition: Disposition,
    /// Why.
    pub cause: Cause,
    /// Refresh frequency ceiling assigned for the next cycle, meaningless for
    /// `Discard`.
    pub refresh_freq: u8,
}

/// Running active/sleeping counters and budgets for one qkey, rebuilt
/// each cycle from its member sites' capacity (a simplified stand-in
/// for the duty-cycle-derived `soft_limit`/`hard_limit`/`freq_limit`
/// triple `set_qkey_limits` computes from `refresh_cycle`,
/// `duty_factor`, and each site's `max_conn`/`min_delay`).
#[derive(Debug, Clone, Default)]
pub struct QkeyState {
    pub soft_limit: u32,
    pub hard_limit: u32,
    pub freq_limit: u32,
    pub num_active: u32,
    pub num_inactive: u32,
    pub freq_total: u32,
}

/// Running active/sleeping counters for one `section` classifier
/// value. No soft/hard limit is modeled (no per-section space budget
/// exists in this crate); the counters are kept for observability.
#[derive(Debug, Clone, Default)]
pub struct SectionState {
    pub num_active: u32,
    pub num_inactive: u32,
}

/// The global performance budget and its running counters, the select
/// stage's outermost limiting level.
#[derive(Debug, Clone, Default)]
pub struct PerfState {
    pub soft_limit: u32,
    pub hard_limit: u32,
    pub freq_limit: u32,
    pub num_active: u32,
    pub num_inactive: u32,
    pub freq_total: u32,
}

impl PerfState {
    /// Derive the global budget from `estimated_raw_performance`,
    /// `refresh_cycle_secs`, and `duty_factor`, splitting off
    /// `global_frequent_factor`'s share for the frequent-refresh pool
    /// and capping that share at the configured `perf_freq_limit`.
    pub fn from_config(cfg: &Config) -> PerfState {
        let perf = cfg.estimated_raw_performance * cfg.refresh_cycle_secs as f64 * cfg.duty_factor * cfg.reap_optimism_factor;
        let soft_limit = (perf * (1.0 - cfg.global_frequent_factor)).max(0.0) as u32;
        let hard_limit = soft_limit.saturating_add(soft_limit / 10).max(soft_limit);
        let freq_limit = ((perf * cfg.global_frequent_factor).max(0.0) as u32).min(cfg.perf_freq_limit);
        PerfState {
            soft_limit,
            hard_limit,
            freq_limit,
            num_active: 0,
            num_inactive: 0,
            freq_total: 0,
        }
    }
}

/// Build one [`QkeyState`] per qkey from its member sites' capacity:
/// `soft_limit` approximates `refresh_cycle * duty_factor * max_conn /
/// min_delay`, summed across the qkey's sites (the real per-site
/// formula, without the frequent-factor split folded in per schema).
pub fn build_qkey_states(sites: &SiteTable, cfg: &Config) -> HashMap<shepherd_core::qkey::Qkey, QkeyState> {
    let mut states: HashMap<shepherd_core::qkey::Qkey, QkeyState> = HashMap::new();
    for site in sites.iter() {
        if site.rejected || !site.qkey(0).skey().is_resolved() {
            continue;
        }
        let qkey = site.qkey(0);
        let schema = cfg
            .refresh_schemas
            .get(site.refresh_schema as usize)
            .or_else(|| cfg.refresh_schemas.first());
        let frequent_factor = schema.map(|s| s.frequent_factor).unwrap_or(0.0);
        let delay = site.min_delay.max(1) as f64;
        let raw = cfg.refresh_cycle_secs as f64 * cfg.duty_factor * site.max_conn.max(1) as f64 / delay;
        let entry = states.entry(qkey).or_default();
        entry.soft_limit = entry.soft_limit.saturating_add((raw * (1.0 - frequent_factor)).max(0.0) as u32);
        entry.hard_limit = entry.soft_limit.saturating_add(entry.soft_limit / 10);
        entry.freq_limit = entry.freq_limit.saturating_add((raw * frequent_factor).max(0.0) as u32);
    }
    states
}

/// `select_weight`: a record's stored `weight`, plus `+1,000,000` if
/// it's `SACRED`, `+100,000` if it carries `SELECT_PRIORITY` (set at
/// merge time from the owning site's `select_bonus` toggle),
/// `Config::select_hysteresis` if it's already `Ok`/`Error`, plus its
/// section's configured bonus.
pub fn select_weight(rec: &UrlState, cfg: &Config) -> u32 {
    let mut w = rec.weight as u32;
    if rec.is_sacred() {
        w += 1_000_000;
    }
    if rec.flags.contains(UrlFlags::SELECT_PRIORITY) {
        w += 100_000;
    }
    if matches!(rec.kind, UrlKind::Ok | UrlKind::Error) {
        w += cfg.select_hysteresis;
    }
    w += cfg
        .section_select_bonus
        .get(&rec.section)
        .copied()
        .unwrap_or(0);
    w
}

/// `weight_compare`: sort key is `(select_weight desc, rest_fp asc,
/// site_fp asc)` — note the footprint tiebreak order is `rest_fp`
/// before `site_fp`, the reverse of [`Footprint`]'s own derived `Ord`.
pub fn weight_cmp(a: &UrlState, b: &UrlState, cfg: &Config) -> std::cmp::Ordering {
    select_weight(b, cfg)
        .cmp(&select_weight(a, cfg))
        .then_with(|| a.fp.rest_fp.cmp(&b.fp.rest_fp))
        .then_with(|| a.fp.site_fp.cmp(&b.fp.site_fp))
}

/// The refresh frequency a record would get if budget were unlimited:
/// looks up `Config::refresh_schemas[site.refresh_schema]` by a
/// `stable_time`-derived bucket (divided down by `site.refresh_boost`
/// when that's more than `1`), then clamps into per-kind floors/
/// ceilings.
fn ideal_refresh_freq(rec: &UrlState, site: &Site, cfg: &Config) -> u8 {
    let schema = cfg
        .refresh_schemas
        .get(site.refresh_schema as usize)
        .or_else(|| cfg.refresh_schemas.first());
    let stable_time = if site.refresh_boost > 1 {
        rec.stable_time / site.refresh_boost as u16
    } else {
        rec.stable_time
    };
    let base = schema
        .and_then(|s| {
            let bucket = (stable_time as usize).min(s.frequencies.len().saturating_sub(1));
            s.frequencies.get(bucket).copied()
        })
        .unwrap_or(1);
    let mut freq = base;

    if rec.flags.contains(UrlFlags::ROBOTS) {
        freq = freq.max(cfg.min_robots_frequency);
    } else if matches!(rec.kind, UrlKind::Error) {
        freq = freq.min(cfg.max_err_frequency);
    } else if rec.flags.contains(UrlFlags::NEEDED_BY_EQ) {
        freq = freq.max(cfg.min_eq_frequency);
    }
    freq.max(1)
}

/// Compute the refresh-frequency ceiling for one record, ignoring any
/// per-qkey/global budget — exposed separately so callers that don't
/// select (tests, reporting) can still ask "what would this record's
/// ideal frequency be".
pub fn refresh_frequency(rec: &UrlState, site: &Site, cfg: &Config) -> u8 {
    ideal_refresh_freq(rec, site, cfg)
}

/// `select_freq`: spend from the per-qkey and global frequent-refresh
/// budgets to grant a record its ideal frequency; once either budget
/// is exhausted, every further record in that qkey (or the whole
/// cycle) falls back to frequency `1` rather than search for a lower
/// tier with remaining quota (a bounded simplification of the real
/// per-frequency-tier `freq_limits[]` search).
pub fn select_freq(rec: &UrlState, site: &Site, qkey: &mut QkeyState, perf: &mut PerfState, cfg: &Config) -> u8 {
    if perf.freq_total >= perf.freq_limit || qkey.freq_total >= qkey.freq_limit {
        return 1;
    }
    let f = ideal_refresh_freq(rec, site, cfg);
    let spend = (f - 1) as u32;
    perf.freq_total = perf.freq_total.saturating_add(spend);
    qkey.freq_total = qkey.freq_total.saturating_add(spend);
    f
}

/// `select_limit`: downgrade `action` to `Sleep` or `Discard` if this
/// level's hard/soft limit is crossed. Never upgrades an already
/// lower action.
fn apply_limit(
    action: &mut Disposition,
    cause: &mut Cause,
    active: u32,
    inactive: u32,
    soft: u32,
    hard: u32,
    level_cause: Cause,
) {
    if *action != Disposition::Discard && active + inactive >= hard {
        *action = Disposition::Discard;
        *cause = level_cause;
    } else if *action == Disposition::Ok && active >= soft {
        *action = Disposition::Sleep;
        *cause = level_cause;
    }
}

/// `update_limit`: bump the level's running active/sleeping counters
/// to match the final chosen action.
fn update_counts(action: Disposition, active: &mut u32, inactive: &mut u32) {
    match action {
        Disposition::Ok => *active += 1,
        Disposition::Sleep => *inactive += 1,
        Disposition::Discard => {}
    }
}

/// Decide one record's disposition, cascading through fresh/site/qkey/
/// perf limits in order, converting a timed-out redirect or expired
/// zombie as it goes, and updating every level's running counters to
/// match the final action. `now` is seconds-since-epoch.
#[allow(clippy::too_many_arguments)]
pub fn decide(
    rec: &mut UrlState,
    site: &mut Site,
    qkey: &mut QkeyState,
    section: &mut SectionState,
    perf: &mut PerfState,
    cfg: &Config,
    now: u32,
) -> SelectOutcome {
    if matches!(rec.kind, UrlKind::Error) && rec.flags.contains(UrlFlags::UNREF) {
        return SelectOutcome {
            disposition: Disposition::Discard,
            cause: Cause::Unreferenced,
            refresh_freq: 0,
        };
    }

    let mut action = Disposition::Ok;
    let mut cause = Cause::WithinLimits;

    if rec.is_sacrisimmus() {
        cause = Cause::Sacred;
        // Bypasses zombie/redirect conversion and every limiting level
        // outright; action stays `Ok`.
    } else {
        if matches!(rec.kind, UrlKind::Zombie) {
            let expired = now.saturating_sub(rec.last_seen) > cfg.zombie_expire_secs;
            action = if expired { Disposition::Discard } else { Disposition::Sleep };
            cause = if expired { Cause::ZombieExpired } else { Cause::ZombieSuppressed };
        } else if rec.no_target && now.saturating_sub(rec.last_seen) > cfg.redirect_to_zombie_timeout_secs {
            rec.mark_zombie(2308);
            action = Disposition::Sleep;
            cause = Cause::RedirectTimedOut;
        }

        if rec.is_sacred() && site.hard_limit != 0 {
            cause = Cause::Sacred;
            // Bypasses the fresh/site/qkey/perf cascade entirely; a
            // zombie/redirect conversion above still stands.
        } else {
            if !matches!(rec.kind, UrlKind::Zombie) && !rec.flags.contains(UrlFlags::TRUE_WEIGHT) {
                site.num_fresh += 1;
                if site.num_fresh > site.fresh_limit {
                    action = Disposition::Sleep;
                    cause = Cause::FreshLimit;
                }
            }
            apply_limit(&mut action, &mut cause, site.num_active, site.num_inactive, site.soft_limit, site.hard_limit, Cause::Site);
            apply_limit(&mut action, &mut cause, qkey.num_active, qkey.num_inactive, qkey.soft_limit, qkey.hard_limit, Cause::Qkey);
            apply_limit(&mut action, &mut cause, perf.num_active, perf.num_inactive, perf.soft_limit, perf.hard_limit, Cause::Perf);
        }
    }

    update_counts(action, &mut site.num_active, &mut site.num_inactive);
    update_counts(action, &mut qkey.num_active, &mut qkey.num_inactive);
    update_counts(action, &mut section.num_active, &mut section.num_inactive);
    update_counts(action, &mut perf.num_active, &mut perf.num_inactive);

    let refresh_freq = match action {
        Disposition::Ok => select_freq(rec, site, qkey, perf, cfg),
        _ => 0,
    };

    SelectOutcome {
        disposition: action,
        cause,
        refresh_freq,
    }
}

/// Running per-cycle counters the select loop threads through every
/// record.
#[derive(Debug, Clone, Default)]
pub struct SelectCounters {
    /// Total records discarded this cycle.
    pub discarded: u64,
    /// Total records put to sleep.
    pub slept: u64,
    /// Total records kept active.
    pub kept: u64,
    /// Sites pruned for having zero surviving non-robots records.
    pub sites_pruned: u64,
    /// Synthetic `NONEXISTENT` `SKEY` records created.
    pub nonexistent_skeys_created: u64,
}

/// Run the select loop over every record, sorted by descending
/// [`select_weight`]; applies [`decide`], wakes `Sleeping` records back
/// to `New` on a fresh `Ok`, sleeps/drops records per its outcome,
/// creates missing `NONEXISTENT` `SKEY` records for sites whose skey
/// went nonexistent with no surviving `SKEY` record this pass, prunes
/// sites left with zero useful (non-robots, surviving) records, trips
/// the safety brake if too many records would be discarded, and logs
/// every transition for monitored sites. Returns the surviving records
/// (already sorted) plus the pass's [`SelectCounters`].
pub fn select_all(
    mut records: Vec<UrlState>,
    sites: &mut SiteTable,
    cfg: &Config,
    now: u32,
    mut state_log: Option<&mut StateLog>,
) -> Result<(Vec<UrlState>, SelectCounters)> {
    let mut counters = SelectCounters::default();
    records.sort_by(|a, b| weight_cmp(a, b, cfg));

    for site in sites.iter_mut() {
        site.num_active = 0;
        site.num_inactive = 0;
        site.num_fresh = 0;
    }
    let mut qkeys = build_qkey_states(sites, cfg);
    let mut sections: HashMap<u16, SectionState> = HashMap::new();
    let mut perf = PerfState::from_config(cfg);
    let mut skey_seen: HashSet<[u8; 16]> = HashSet::new();
    let mut useful: HashMap<[u8; 16], u32> = HashMap::new();

    let mut survivors: Vec<UrlState> = Vec::with_capacity(records.len());

    for mut rec in records {
        let Some(mut site) = sites.get(&rec.fp.site_fp).cloned() else {
            continue;
        };
        if site.rejected {
            continue;
        }

        if matches!(rec.kind, UrlKind::Skey) {
            skey_seen.insert(rec.fp.site_fp);
            survivors.push(rec);
            continue;
        }

        let qkey = site.qkey(0);
        let qkey_state = qkeys.entry(qkey).or_insert_with(|| QkeyState {
            soft_limit: u32::MAX,
            hard_limit: u32::MAX,
            freq_limit: 0,
            num_active: 0,
            num_inactive: 0,
            freq_total: 0,
        });
        let section = sections.entry(rec.section).or_default();

        let outcome = decide(&mut rec, &mut site, qkey_state, section, &mut perf, cfg, now);
        if let Some(stored) = sites.get_mut(&rec.fp.site_fp) {
            stored.num_active = site.num_active;
            stored.num_inactive = site.num_inactive;
            stored.num_fresh = site.num_fresh;
        }

        match outcome.disposition {
            Disposition::Ok => {
                if matches!(rec.kind, UrlKind::Sleeping) {
                    rec.kind = UrlKind::New;
                }
                rec.refresh_freq = outcome.refresh_freq;
                counters.kept += 1;
                if !rec.flags.contains(UrlFlags::ROBOTS) {
                    *useful.entry(rec.fp.site_fp).or_insert(0) += 1;
                }
                survivors.push(rec);
            }
            Disposition::Sleep => {
                if !matches!(rec.kind, UrlKind::Zombie) {
                    rec.kind = UrlKind::Sleeping;
                }
                rec.refresh_freq = 0;
                counters.slept += 1;
                if !rec.flags.contains(UrlFlags::ROBOTS) {
                    *useful.entry(rec.fp.site_fp).or_insert(0) += 1;
                }
                survivors.push(rec);
            }
            Disposition::Discard => {
                counters.discarded += 1;
            }
        }

        if site.monitor {
            if let Some(log) = state_log.as_deref_mut() {
                log.append(&StateLogEntry {
                    fp: rec.fp,
                    source: "select".to_string(),
                    action: format!("{:?}", outcome.disposition).to_lowercase(),
                    arg1: outcome.refresh_freq as i64,
                    arg2: 0,
                })?;
            }
        }
    }

    if counters.discarded > cfg.safety_brake_limit {
        return Err(Error::SafetyBrakeTripped {
            lost: counters.discarded,
            limit: cfg.safety_brake_limit,
        });
    }

    for site in sites.iter() {
        if site.rejected || skey_seen.contains(&site.fp) || !site.skey.is_nonexistent() {
            continue;
        }
        let mut skey_rec = UrlState::new_skey(site.fp, site.skey.0);
        skey_rec.last_seen = now;
        skey_rec.flags |= UrlFlags::ROBOTS;
        survivors.push(skey_rec);
        counters.nonexistent_skeys_created += 1;
    }

    let pruned: Vec<[u8; 16]> = sites
        .iter()
        .filter(|s| !s.rejected && useful.get(&s.fp).copied().unwrap_or(0) == 0)
        .map(|s| s.fp)
        .collect();
    for fp in pruned {
        sites.remove(&fp);
        counters.sites_pruned += 1;
    }

    Ok((survivors, counters))
}

/// A record's footprint, surfaced for synthetic-`SKEY`-record
/// construction outside this module without re-exposing internals.
pub fn skey_footprint(site_fp: [u8; 16]) -> Footprint {
    Footprint::skey_of_site(site_fp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::footprint::Footprint;
    use shepherd_core::qkey::Skey;

    fn site() -> Site {
        Site {
            fp: [1u8; 16],
            norm_fp: [1u8; 16],
            proto: 0,
            host: "example.com".into(),
            port: 80,
            skey: Skey::unresolved(0, 16),
            soft_limit: 2,
            hard_limit: 3,
            fresh_limit: 10,
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

    fn rec() -> UrlState {
        UrlState::new(Footprint::new([1u8; 16], [2u8; 16]), 100, UrlFlags::empty())
    }

    fn unlimited_qkey() -> QkeyState {
        QkeyState {
            soft_limit: u32::MAX,
            hard_limit: u32::MAX,
            freq_limit: u32::MAX,
            num_active: 0,
            num_inactive: 0,
            freq_total: 0,
        }
    }

    fn unlimited_perf() -> PerfState {
        PerfState {
            soft_limit: u32::MAX,
            hard_limit: u32::MAX,
            freq_limit: u32::MAX,
            num_active: 0,
            num_inactive: 0,
            freq_total: 0,
        }
    }

    #[test]
    fn under_soft_limit_is_kept_ok() {
        let cfg = Config::default();
        let mut s = site();
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        let outcome = decide(&mut rec(), &mut s, &mut qkey, &mut section, &mut perf, &cfg, 0);
        assert_eq!(outcome.disposition, Disposition::Ok);
        assert_eq!(outcome.cause, Cause::WithinLimits);
    }

    #[test]
    fn over_soft_under_hard_sleeps() {
        let cfg = Config::default();
        let mut s = site();
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        s.num_active = 2;
        let outcome = decide(&mut rec(), &mut s, &mut qkey, &mut section, &mut perf, &cfg, 0);
        assert_eq!(outcome.disposition, Disposition::Sleep);
        assert_eq!(outcome.cause, Cause::Site);
    }

    #[test]
    fn over_hard_limit_is_discarded() {
        let cfg = Config::default();
        let mut s = site();
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        s.num_active = 3;
        let outcome = decide(&mut rec(), &mut s, &mut qkey, &mut section, &mut perf, &cfg, 0);
        assert_eq!(outcome.disposition, Disposition::Discard);
        assert_eq!(outcome.cause, Cause::Site);
    }

    #[test]
    fn sacrisimmus_record_bypasses_limits_even_with_zero_hard_limit() {
        let cfg = Config::default();
        let mut s = site();
        s.hard_limit = 0;
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        let mut r = rec();
        r.flags |= UrlFlags::INIT | UrlFlags::ROBOTS;
        let outcome = decide(&mut r, &mut s, &mut qkey, &mut section, &mut perf, &cfg, 0);
        assert_eq!(outcome.disposition, Disposition::Ok);
        assert_eq!(outcome.cause, Cause::Sacred);
    }

    #[test]
    fn sacred_record_is_still_discarded_when_site_hard_limit_is_zero() {
        let cfg = Config::default();
        let mut s = site();
        s.hard_limit = 0;
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        let mut r = rec();
        r.flags |= UrlFlags::NEEDED_BY_EQ;
        let outcome = decide(&mut r, &mut s, &mut qkey, &mut section, &mut perf, &cfg, 0);
        assert_eq!(outcome.disposition, Disposition::Discard);
    }

    #[test]
    fn sacred_record_bypasses_limits_when_site_has_a_hard_limit() {
        let cfg = Config::default();
        let mut s = site();
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        let mut r = rec();
        r.flags |= UrlFlags::INIT;
        s.num_active = 1000;
        let outcome = decide(&mut r, &mut s, &mut qkey, &mut section, &mut perf, &cfg, 0);
        assert_eq!(outcome.disposition, Disposition::Ok);
        assert_eq!(outcome.cause, Cause::Sacred);
    }

    #[test]
    fn expired_zombie_is_discarded() {
        let cfg = Config::default();
        let mut s = site();
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        let mut r = rec();
        r.kind = UrlKind::Zombie;
        r.last_seen = 0;
        let outcome = decide(&mut r, &mut s, &mut qkey, &mut section, &mut perf, &cfg, cfg.zombie_expire_secs + 1);
        assert_eq!(outcome.disposition, Disposition::Discard);
        assert_eq!(outcome.cause, Cause::ZombieExpired);
    }

    #[test]
    fn unexpired_zombie_sleeps() {
        let cfg = Config::default();
        let mut s = site();
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        let mut r = rec();
        r.kind = UrlKind::Zombie;
        r.last_seen = 100;
        let outcome = decide(&mut r, &mut s, &mut qkey, &mut section, &mut perf, &cfg, 100);
        assert_eq!(outcome.disposition, Disposition::Sleep);
        assert_eq!(outcome.cause, Cause::ZombieSuppressed);
    }

    #[test]
    fn stale_redirect_is_converted_to_a_sleeping_zombie() {
        let cfg = Config::default();
        let mut s = site();
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        let mut r = rec();
        r.no_target = true;
        r.last_seen = 0;
        let now = cfg.redirect_to_zombie_timeout_secs + 1;
        let outcome = decide(&mut r, &mut s, &mut qkey, &mut section, &mut perf, &cfg, now);
        assert_eq!(outcome.disposition, Disposition::Sleep);
        assert_eq!(outcome.cause, Cause::RedirectTimedOut);
        assert_eq!(r.kind, UrlKind::Zombie);
        assert_eq!(r.oid, Oid(2308));
    }

    #[test]
    fn unreferenced_error_is_dropped_without_touching_counters() {
        let cfg = Config::default();
        let mut s = site();
        let mut qkey = unlimited_qkey();
        let mut section = SectionState::default();
        let mut perf = unlimited_perf();
        let mut r = rec();
        r.kind = UrlKind::Error;
        r.flags |= UrlFlags::UNREF;
        let outcome = decide(&mut r, &mut s, &mut qkey, &mut section, &mut perf, &cfg, 0);
        assert_eq!(outcome.disposition, Disposition::Discard);
        assert_eq!(outcome.cause, Cause::Unreferenced);
        assert_eq!(s.num_active, 0);
        assert_eq!(s.num_inactive, 0);
    }

    #[test]
    fn select_weight_includes_sacred_priority_hysteresis_and_section_bonus() {
        let mut cfg = Config::default();
        cfg.section_select_bonus.insert(7, 50);
        let mut r = rec();
        r.weight = 10;
        r.section = 7;
        r.flags |= UrlFlags::SELECT_PRIORITY;
        r.kind = UrlKind::Ok;
        assert_eq!(select_weight(&r, &cfg), 10 + 100_000 + cfg.select_hysteresis + 50);
    }

    #[test]
    fn weight_cmp_breaks_ties_by_rest_fp_then_site_fp() {
        let cfg = Config::default();
        let mut a = rec();
        a.fp = Footprint::new([2u8; 16], [1u8; 16]);
        let mut b = rec();
        b.fp = Footprint::new([1u8; 16], [2u8; 16]);
        // Equal weight: rest_fp (a=[1..],b=[2..]) decides, a sorts first.
        assert_eq!(weight_cmp(&a, &b, &cfg), std::cmp::Ordering::Less);
    }

    #[test]
    fn select_freq_falls_back_to_one_once_qkey_budget_is_exhausted() {
        let cfg = Config::default();
        let s = site();
        let mut qkey = unlimited_qkey();
        qkey.freq_total = qkey.freq_limit;
        let mut perf = unlimited_perf();
        assert_eq!(select_freq(&rec(), &s, &mut qkey, &mut perf, &cfg), 1);
    }

    #[test]
    fn select_all_discards_past_hard_limit_within_one_site() {
        let cfg = Config::default();
        let mut sites = SiteTable::new();
        let s = sites.get_or_create([1u8; 16], 0, "example.com", 80, &cfg, 0);
        s.skey = Skey(0x0A00_0001);
        s.soft_limit = 2;
        s.hard_limit = 3;
        let mut records = vec![rec(), rec(), rec(), rec()];
        for (i, r) in records.iter_mut().enumerate() {
            r.fp = Footprint::new([1u8; 16], [i as u8; 16]);
            r.kind = UrlKind::Ok;
        }
        let (survivors, counters) = select_all(records, &mut sites, &cfg, 0, None).unwrap();
        assert_eq!(counters.kept, 2);
        assert_eq!(counters.slept, 1);
        assert_eq!(counters.discarded, 1);
        assert_eq!(survivors.len(), 3);
    }

    #[test]
    fn sites_with_zero_useful_records_are_pruned() {
        let cfg = Config::default();
        let mut sites = SiteTable::new();
        let s = sites.get_or_create([9u8; 16], 0, "gone.example.com", 80, &cfg, 0);
        s.skey = Skey(0x0A00_0002);
        s.hard_limit = 0;
        let mut r = rec();
        r.fp = Footprint::new([9u8; 16], [2u8; 16]);
        r.kind = UrlKind::Ok;
        let (survivors, counters) = select_all(vec![r], &mut sites, &cfg, 0, None).unwrap();
        assert!(survivors.is_empty());
        assert_eq!(counters.sites_pruned, 1);
        assert_eq!(sites.len(), 0);
    }

    #[test]
    fn missing_nonexistent_skey_record_is_synthesized() {
        let cfg = Config::default();
        let mut sites = SiteTable::new();
        let s = sites.get_or_create([3u8; 16], 0, "dead.example.com", 80, &cfg, 0);
        s.skey = Skey::nonexistent(0, 16);
        let (survivors, counters) = select_all(Vec::new(), &mut sites, &cfg, 500, None).unwrap();
        assert_eq!(counters.nonexistent_skeys_created, 1);
        assert!(survivors.iter().any(|r| matches!(r.kind, UrlKind::Skey)));
    }

    #[test]
    fn safety_brake_trips_when_too_many_discarded() {
        let mut cfg = Config::default();
        cfg.safety_brake_limit = 0;
        let mut sites = SiteTable::new();
        let s = sites.get_or_create([1u8; 16], 0, "example.com", 80, &cfg, 0);
        s.skey = Skey(0x0A00_0001);
        s.hard_limit = 0;
        let mut r = rec();
        r.kind = UrlKind::Ok;
        let err = select_all(vec![r], &mut sites, &cfg, 0, None).unwrap_err();
        assert!(matches!(err, Error::SafetyBrakeTripped { .. }));
    }
}
