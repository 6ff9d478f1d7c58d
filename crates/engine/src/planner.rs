//! The planner: `plan_gather_p`'s priority-band rule, the three-budget
//! walk (global/per-qkey/per-area), synthetic-robots promotion, and the
//! `(site, channel, priority desc)` plan serialization.

use rustc_hash::FxHashMap;
use shepherd_core::footprint::Footprint;
use shepherd_core::plan::{Plan, PlanBlock, PlanEntry, PlanEntryFlags};
use shepherd_core::qkey::Qkey;
use shepherd_core::url_state::{Oid, UrlFlags, UrlKind};
use shepherd_core::{Config, Result, Site, UrlState};

use crate::site_table::SiteTable;

/// Optional per-cycle planning statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanStats {
    /// Total candidates considered.
    pub considered: u64,
    /// Candidates the priority rule itself skipped: fresh and not yet
    /// due for any refresh tier.
    pub skipped_not_due: u64,
    /// Candidates actually scheduled.
    pub scheduled: u64,
    /// Candidates skipped because the global budget was exhausted.
    pub global_budget_exhausted: u64,
    /// Candidates skipped because their area's budget was exhausted.
    pub area_budget_exhausted: u64,
    /// Candidates skipped because their qkey's per-cycle allotment was
    /// exhausted.
    pub qkey_budget_exhausted: u64,
    /// Synthetic robots.txt entries inserted.
    pub synthetic_robots: u64,
}

/// A candidate priority together with the plan-entry flags the band
/// that produced it implies. `None` means the record is not due this
/// cycle and should be skipped outright.
pub type PriorityResult = Option<(u32, PlanEntryFlags)>;

/// Computes candidate priority and assembles the plan.
pub struct Planner<'a> {
    cfg: &'a Config,
}

impl<'a> Planner<'a> {
    /// Build a planner bound to `cfg`'s budgets and priority tunables.
    pub fn new(cfg: &'a Config) -> Planner<'a> {
        Planner { cfg }
    }

    /// `plan_gather_p`: the per-candidate priority-band rule. Returns
    /// `None` when the record isn't due this cycle at all (a fresh,
    /// not-yet-aged `OK`/`ERROR` record below every refresh band).
    ///
    /// `planner_random` is a single value shared by every candidate in
    /// one planning pass, used only to spread candidates with
    /// otherwise-identical ages across a priority band so they don't
    /// all land on the exact same tick; callers own how it's chosen
    /// (a fixed seed keeps planning reproducible in tests).
    pub fn priority(&self, rec: &UrlState, now: u32, planner_random: u32) -> PriorityResult {
        let mut flags = match rec.kind {
            UrlKind::Skey | UrlKind::Sleeping | UrlKind::Zombie => return None,
            UrlKind::Ok | UrlKind::Error | UrlKind::TempError => PlanEntryFlags::REFRESH,
            UrlKind::New => PlanEntryFlags::empty(),
        };

        let reap_cycle = self.cfg.reap_cycle_secs.max(1) as u64;
        let refresh_cycle = self.cfg.refresh_cycle_secs.max(1) as u64;
        let anticipated_age = self.cfg.anticipated_refresh_age_secs as u64;

        let random = (rec.fp.site_fp[0] ^ rec.fp.rest_fp[0]) as u32 ^ planner_random;
        let raw_age = if rec.last_seen > now {
            0
        } else {
            (now - rec.last_seen) as u64
        };
        let freq = rec.refresh_freq.max(1) as u64;
        let freq2 = if freq > 3 { freq / 3 } else { 1 };
        let age = raw_age + (random as u64) % (reap_cycle / 4).max(1);
        let fage1 = freq * age;
        let fage2 = freq2 * age + (random as u64) % (refresh_cycle / 8).max(1);

        let priority: u64 = if rec.flags.contains(UrlFlags::REGATHER) {
            flags.remove(PlanEntryFlags::REFRESH);
            4_000_000_000 + age.min(294_000_000)
        } else if matches!(rec.kind, UrlKind::New) {
            let cage = age.min(2 * refresh_cycle);
            let mut p = (rec.weight as u64) * 100_000;
            p += cage * 5_000_000 / (2 * refresh_cycle + 4 * 86_400);
            p += if rec.flags.contains(UrlFlags::INIT) {
                1_400_000_000
            } else {
                1_200_000_000
            };
            p
        } else if age >= 3 * refresh_cycle / 2 {
            flags |= PlanEntryFlags::OVER_AGED;
            1_900_000_000 + age.min(90_000_000)
        } else if fage2 >= refresh_cycle {
            1_500_000_000 + (fage2 / 8).min(90_000_000)
        } else if fage1 >= refresh_cycle {
            1_000_000_000 + (fage1 / 8).min(90_000_000)
        } else if fage2 >= anticipated_age {
            flags |= PlanEntryFlags::ANTICIPATED;
            (fage2 / 8).min(90_000_000)
        } else {
            return None;
        };

        if rec.flags.contains(UrlFlags::ROBOTS) {
            flags |= PlanEntryFlags::ROBOTS;
        }
        if rec.is_sacrisimmus() {
            flags |= PlanEntryFlags::SACRISIMMUS;
        }

        Some((priority.min(u32::MAX as u64) as u32, flags))
    }

    /// `plan_adjust_bonus`: applied once, at plan-generation time, not
    /// inside [`Planner::priority`] — a site's `queue_bonus` only lifts
    /// priorities already in the `[1e9, 2e9)` refresh band, and only for
    /// a site with a real, resolved skey (an unresolved or nonexistent
    /// site has nothing to gain from jumping its refresh queue before
    /// it can even be reached).
    fn adjust_bonus(priority: u32, site: &Site) -> u32 {
        if (1_000_000_000..2_000_000_000).contains(&priority) && site.has_real_skey() {
            priority.saturating_add(site.queue_bonus.min(2_000_000_000))
        } else {
            priority
        }
    }

    /// Build a complete plan: walk all candidates, track a global
    /// budget, a per-area budget, and a per-qkey budget derived from
    /// each qkey's aggregate site capacity, synthesize a `SYNTH_ROBOTS`
    /// entry for any site lacking a resolved robots oid, then sort each
    /// block's entries by descending priority.
    pub fn build_plan(
        &self,
        sites: &SiteTable,
        candidates: impl Iterator<Item = Result<UrlState>>,
        now: u32,
        planner_random: u32,
    ) -> Result<(Plan, PlanStats)> {
        let mut stats = PlanStats::default();
        let global_budget = (self.cfg.estimated_raw_performance
            * self.cfg.reap_optimism_factor
            * self.cfg.reap_cycle_secs as f64) as u64;
        let mut global_spent: u64 = 0;
        let mut area_spent: FxHashMap<u16, u32> = FxHashMap::default();

        // Per-qkey duty-cycle budget: how many candidates a qkey's
        // member sites can plausibly service in one reap cycle, given
        // their combined `max_conn` and `min_delay`.
        let mut qkey_budget: FxHashMap<Qkey, u32> = FxHashMap::default();
        for site in sites.iter() {
            if site.rejected {
                continue;
            }
            let qkey = site.qkey(0);
            let delay = site.min_delay.max(1) as u64;
            let slots = (self.cfg.reap_cycle_secs as u64 * self.cfg.duty_factor as u64).max(1);
            let site_cap = (slots / delay).max(1) as u32 * site.max_conn.max(1);
            *qkey_budget.entry(qkey).or_insert(0) += site_cap;
        }
        let mut qkey_spent: FxHashMap<Qkey, u32> = FxHashMap::default();

        let mut blocks: FxHashMap<Qkey, PlanBlock> = FxHashMap::default();
        let mut robots_seen: std::collections::HashSet<[u8; 16]> = std::collections::HashSet::new();

        for rec in candidates {
            let rec = rec?;
            stats.considered += 1;

            let Some(site) = sites.get(&rec.fp.site_fp) else {
                continue;
            };
            if site.rejected {
                continue;
            }

            let Some((priority, flags)) = self.priority(&rec, now, planner_random) else {
                stats.skipped_not_due += 1;
                continue;
            };
            let priority = Self::adjust_bonus(priority, site);

            if global_spent >= global_budget {
                stats.global_budget_exhausted += 1;
                continue;
            }
            let area_used = area_spent.entry(rec.area).or_insert(0);
            if *area_used >= self.cfg.plan_limit_per_area {
                stats.area_budget_exhausted += 1;
                continue;
            }
            let qkey = site.qkey(0);
            let qused = qkey_spent.entry(qkey).or_insert(0);
            let qcap = qkey_budget.get(&qkey).copied().unwrap_or(u32::MAX);
            if *qused >= qcap {
                stats.qkey_budget_exhausted += 1;
                continue;
            }

            if rec.flags.contains(UrlFlags::ROBOTS) {
                robots_seen.insert(rec.fp.site_fp);
            }

            let block = blocks.entry(qkey).or_insert_with(|| PlanBlock {
                qkey,
                robot_oid: Oid::UNDEFINED,
                delay_secs: site.min_delay,
                entries: Vec::new(),
            });
            if rec.flags.contains(UrlFlags::ROBOTS) {
                block.robot_oid = rec.oid;
            }
            block.entries.push(PlanEntry {
                fp: rec.fp,
                oid: rec.oid,
                priority,
                retry_count: rec.retry_count,
                weight: rec.weight,
                flags,
                section: rec.section,
                area: rec.area,
            });

            *area_used += 1;
            *qused += 1;
            global_spent += 1;
            stats.scheduled += 1;
        }

        for site in sites.iter() {
            if site.rejected || robots_seen.contains(&site.fp) {
                continue;
            }
            let qkey = site.qkey(0);
            let block = blocks.entry(qkey).or_insert_with(|| PlanBlock {
                qkey,
                robot_oid: Oid::UNDEFINED,
                delay_secs: site.min_delay,
                entries: Vec::new(),
            });
            block.entries.push(PlanEntry {
                fp: Footprint::new(site.fp, shepherd_core::footprint::ROBOTS_TXT),
                oid: Oid::UNDEFINED,
                priority: u32::MAX,
                retry_count: 0,
                weight: 0xff,
                flags: PlanEntryFlags::SYNTH_ROBOTS | PlanEntryFlags::ROBOTS,
                section: 0,
                area: 0,
            });
            stats.synthetic_robots += 1;
        }

        let mut plan: Plan = blocks.into_values().collect();
        for block in &mut plan {
            block.entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        plan.sort_by_key(|b| b.qkey);

        Ok((plan, stats))
    }
}

/// A candidate's originating footprint, surfaced for callers that need
/// to correlate a plan entry back to its index record without
/// re-reading `oid` semantics (the index stores `fp`, the plan only
/// `oid`).
pub fn entry_footprint(rec: &UrlState) -> Footprint {
    rec.fp
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::qkey::Skey;
    use shepherd_core::Site;

    fn site(fp: [u8; 16]) -> Site {
        Site {
            fp,
            norm_fp: fp,
            proto: 0,
            host: "example.com".into(),
            port: 80,
            skey: Skey(0x0A000001),
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

    fn rec(fp_site: [u8; 16], weight: u8) -> UrlState {
        UrlState::new(Footprint::new(fp_site, [1u8; 16]), weight, UrlFlags::empty())
    }

    #[test]
    fn regather_record_gets_the_top_band_and_drops_refresh_flag() {
        let cfg = Config::default();
        let planner = Planner::new(&cfg);
        let mut r = rec([1u8; 16], 10);
        r.kind = UrlKind::Ok;
        r.flags |= UrlFlags::REGATHER;
        let (priority, flags) = planner.priority(&r, 0, 0).unwrap();
        assert!(priority >= 4_000_000_000);
        assert!(!flags.contains(PlanEntryFlags::REFRESH));
    }

    #[test]
    fn new_record_lands_in_the_new_band() {
        let cfg = Config::default();
        let planner = Planner::new(&cfg);
        let r = rec([1u8; 16], 10);
        let (priority, _flags) = planner.priority(&r, 0, 0).unwrap();
        assert!((1_200_000_000..1_900_000_000).contains(&priority));
    }

    #[test]
    fn fresh_ok_record_is_skipped_entirely() {
        let cfg = Config::default();
        let planner = Planner::new(&cfg);
        let mut r = rec([1u8; 16], 10);
        r.kind = UrlKind::Ok;
        r.last_seen = 0;
        r.refresh_freq = 1;
        assert!(planner.priority(&r, 1, 0).is_none());
    }

    #[test]
    fn heavily_aged_record_is_over_aged() {
        let cfg = Config::default();
        let planner = Planner::new(&cfg);
        let mut r = rec([1u8; 16], 10);
        r.kind = UrlKind::Ok;
        r.last_seen = 0;
        let now = (cfg.refresh_cycle_secs * 2) as u32;
        let (priority, flags) = planner.priority(&r, now, 0).unwrap();
        assert!(priority >= 1_900_000_000);
        assert!(flags.contains(PlanEntryFlags::OVER_AGED));
    }

    #[test]
    fn adjust_bonus_only_applies_within_the_refresh_band_and_a_resolved_skey() {
        let mut s = site([1u8; 16]);
        s.queue_bonus = 500;
        assert_eq!(Planner::adjust_bonus(1_500_000_000, &s), 1_500_000_500);
        assert_eq!(Planner::adjust_bonus(500_000_000, &s), 500_000_000);
        s.skey = Skey::unresolved(0, 16);
        assert_eq!(Planner::adjust_bonus(1_500_000_000, &s), 1_500_000_000);
    }

    #[test]
    fn build_plan_groups_by_site_and_sorts_by_priority_desc() {
        let cfg = Config::default();
        let planner = Planner::new(&cfg);
        let mut sites = SiteTable::new();
        let s = sites.get_or_create([1u8; 16], 0, "example.com", 80, &cfg, 0);
        s.skey = Skey(0x0A000001);
        s.rejected = false;

        let mut low = rec([1u8; 16], 1);
        low.kind = UrlKind::Ok;
        low.last_seen = 0;
        let mut high = rec([1u8; 16], 255);
        high.kind = UrlKind::Ok;
        high.last_seen = 0;

        let now = cfg.refresh_cycle_secs * 2;
        let (plan, stats) = planner
            .build_plan(&sites, vec![Ok(low), Ok(high)].into_iter(), now, 0)
            .unwrap();
        assert_eq!(stats.considered, 2);
        let block = plan.iter().find(|b| !b.entries.is_empty()).unwrap();
        assert!(block.entries[0].priority >= block.entries.last().unwrap().priority);
    }

    #[test]
    fn site_without_robots_gets_synthetic_entry() {
        let cfg = Config::default();
        let planner = Planner::new(&cfg);
        let mut sites = SiteTable::new();
        sites.get_or_create([2u8; 16], 0, "noRobots.example.com", 80, &cfg, 0);

        let (plan, stats) = planner
            .build_plan(&sites, std::iter::empty(), 0, 0)
            .unwrap();
        assert_eq!(stats.synthetic_robots, 1);
        let block = plan.iter().find(|b| !b.entries.is_empty()).unwrap();
        assert!(block.entries[0].flags.contains(PlanEntryFlags::SYNTH_ROBOTS));
    }

    #[test]
    fn rejected_sites_are_skipped_entirely() {
        let cfg = Config::default();
        let planner = Planner::new(&cfg);
        let mut sites = SiteTable::new();
        let s = sites.get_or_create([3u8; 16], 0, "blocked.example.com", 80, &cfg, 0);
        s.rejected = true;

        let mut r = rec([3u8; 16], 10);
        r.kind = UrlKind::Ok;
        let (plan, stats) = planner
            .build_plan(&sites, vec![Ok(r)].into_iter(), 0, 0)
            .unwrap();
        assert_eq!(stats.scheduled, 0);
        assert!(plan.iter().all(|b| b.entries.is_empty()));
    }
}
