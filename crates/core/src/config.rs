//! Every tunable the daemon reads at startup, collected into one struct
//! loaded once by the master process: a plain struct with a `Default`
//! impl and a `from_file` constructor layered on top of `serde`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Refresh-frequency ceiling table for one refresh schema: indexed by a
/// clamped `stable_time` bucket, giving the maximum `refresh_freq` the
/// select stage may assign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshSchema {
    /// `stability_to_freq_index[stable_time_bucket] -> max refresh_freq`.
    pub frequencies: Vec<u8>,
    /// Fraction of this schema's qkeys' soft limit set aside for the
    /// frequent-refresh budget `select_freq` draws from.
    pub frequent_factor: f64,
}

impl Default for RefreshSchema {
    fn default() -> Self {
        // A gently-declining default schedule: very stable pages get
        // fetched less often than unstable ones.
        RefreshSchema {
            frequencies: vec![32, 16, 8, 4, 2, 1],
            frequent_factor: 0.2,
        }
    }
}

/// All daemon tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Nominal length of one reap cycle, in seconds.
    pub reap_cycle_secs: u32,
    /// Nominal length of one refresh cycle, in seconds — the band
    /// thresholds `plan_gather_p` uses to decide REFRESH/OVER_AGED/
    /// ANTICIPATED, distinct from `reap_cycle_secs`'s role as the
    /// reaper's own duty-cycle length.
    pub refresh_cycle_secs: u32,
    /// Minimum `freq2`-scaled age at which a record becomes an
    /// `ANTICIPATED` refresh candidate ahead of its normal window.
    pub anticipated_refresh_age_secs: u32,
    /// Multiplies the raw estimated performance figure to derive the
    /// global per-cycle fetch budget.
    pub reap_optimism_factor: f64,
    /// Estimated sustained fetch rate, URLs/sec, used for the same
    /// global budget computation.
    pub estimated_raw_performance: f64,
    /// Per-area fetch budget for one cycle.
    pub plan_limit_per_area: u32,

    /// Upper bound on the number of `UNRESOLVED` pseudo-skey buckets.
    pub max_resolvers: u32,
    /// Upper bound on the number of `NONEXISTENT` pseudo-skey buckets.
    pub max_flushers: u32,

    /// How often the reaper flushes and checkpoints, in seconds.
    pub checkpoint_period_secs: u32,
    /// Byte budget for the in-memory contribution dedup hash before a
    /// forced flush+reset.
    pub contrib_cache_size: usize,
    /// Buffer size used by bucket-file shakedown.
    pub shake_buf_size: usize,

    /// Retry threshold after which `TEMP_REQUEST`/`TEMP_CONNECTION`
    /// promote to `PERM`.
    pub req_err_retry: u8,
    /// Inclusive `PERM` error-code range that becomes a `ZOMBIE` rather
    /// than a permanent deletion.
    pub zombie_errors: (u32, u32),
    /// Seconds after which a zombie's suppression expires.
    pub zombie_expire_secs: u32,
    /// Seconds after which a redirect-to-unknown-target becomes a
    /// zombie with error code 2308.
    pub redirect_to_zombie_timeout_secs: u32,

    /// Per-qkey selection frequency budget.
    pub perf_freq_limit: u32,
    /// Minimum refresh frequency for robots.txt records, regardless of
    /// age.
    pub min_robots_frequency: u8,
    /// Maximum refresh frequency for error records.
    pub max_err_frequency: u8,
    /// Minimum refresh frequency for equivalence-required records.
    pub min_eq_frequency: u8,
    /// Additive select-stage bonus for a record that is already `Ok`.
    pub select_hysteresis: u32,
    /// Fraction of `estimated_raw_performance` actually available for
    /// scheduling, after accounting for politeness delay and retries.
    pub duty_factor: f64,
    /// Fraction of the global select-stage budget set aside for the
    /// frequent-refresh allocation `select_freq` draws from, on top of
    /// each qkey's own `RefreshSchema::frequent_factor` share.
    pub global_frequent_factor: f64,
    /// Additive select-stage bonus per `UrlState::section`, looked up
    /// in place of a per-site bonus so the same classifier tag gets a
    /// consistent boost across every site that uses it.
    pub section_select_bonus: std::collections::HashMap<u16, u32>,

    /// Refresh schemas, indexed by `Site::refresh_schema`.
    pub refresh_schemas: Vec<RefreshSchema>,

    /// Hard ceiling on URLs the select stage may drop in one cycle
    /// before the cycle aborts.
    pub safety_brake_limit: u64,

    /// Minimum free disk space, in bytes, below which new cycles are
    /// blocked.
    pub min_free_space_bytes: u64,
    /// Bucket-file headroom to always reserve below `BucketFile::max_size`.
    pub min_bucket_reserve_bytes: u64,
    /// How often the master polls free space / bucket-file size, in
    /// seconds.
    pub bucket_watch_period_secs: u32,

    /// Threshold below which `AutoGoRoot` synthesises a root-page
    /// candidate for every non-root contribution.
    pub auto_go_root: bool,
    /// Amount subtracted from a parent page's weight when feeding a
    /// discovered reference into the contribution store.
    pub contrib_gap: u8,

    /// TCP port the control server listens on.
    pub control_port: u16,
    /// IP allowlist for control-protocol authorisation; empty means "allow
    /// all", matching a permissive default for local development.
    pub authorized_ips: Vec<String>,

    /// Destination for routine progress e-mail reports.
    pub progress_mail: Option<String>,
    /// Destination for error e-mail reports.
    pub error_mail: Option<String>,

    /// Emit the optional `plan-stats` file after planning.
    pub planner_stats: bool,
    /// Ignore all link-extraction attributes except `Y`.
    pub ignore_refs: bool,
    /// Number of local prefetch worker threads; `0` disables the pool
    /// and the reaper fetches inline.
    pub prefetch_threads: usize,

    /// Unit size, in seconds, of the `stable_time` field.
    pub stable_time_unit_secs: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            reap_cycle_secs: 7 * 24 * 3600,
            refresh_cycle_secs: 24 * 3600,
            anticipated_refresh_age_secs: 12 * 3600,
            reap_optimism_factor: 1.2,
            estimated_raw_performance: 50.0,
            plan_limit_per_area: 2_000_000,

            max_resolvers: 16,
            max_flushers: 16,

            checkpoint_period_secs: 60,
            contrib_cache_size: 64 * 1024 * 1024,
            shake_buf_size: 1024 * 1024,

            req_err_retry: 3,
            zombie_errors: (2300, 2399),
            zombie_expire_secs: 30 * 24 * 3600,
            redirect_to_zombie_timeout_secs: 14 * 24 * 3600,

            perf_freq_limit: u32::MAX,
            min_robots_frequency: 24,
            max_err_frequency: 4,
            min_eq_frequency: 8,
            select_hysteresis: 1_000,
            duty_factor: 0.85,
            global_frequent_factor: 0.2,
            section_select_bonus: std::collections::HashMap::new(),

            refresh_schemas: vec![RefreshSchema::default()],

            safety_brake_limit: 1_000_000,

            min_free_space_bytes: 1 << 30, // 1 GiB
            min_bucket_reserve_bytes: 64 << 20, // 64 MiB
            bucket_watch_period_secs: 30,

            auto_go_root: true,
            contrib_gap: 10,

            control_port: 8187,
            authorized_ips: Vec::new(),

            progress_mail: None,
            error_mail: None,

            planner_stats: false,
            ignore_refs: false,
            prefetch_threads: 4,

            stable_time_unit_secs: 3600,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to
    /// [`Default::default`] for any field the file doesn't set.
    pub fn from_file(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate cross-field invariants that `serde`'s structural
    /// deserialization can't express.
    pub fn validate(&self) -> Result<()> {
        if self.refresh_schemas.is_empty() {
            return Err(Error::Config("refresh_schemas must not be empty".into()));
        }
        if self.zombie_errors.0 > self.zombie_errors.1 {
            return Err(Error::Config("zombie_errors range is inverted".into()));
        }
        if self.max_resolvers == 0 || self.max_flushers == 0 {
            return Err(Error::Config(
                "max_resolvers and max_flushers must be nonzero".into(),
            ));
        }
        if self.refresh_cycle_secs == 0 {
            return Err(Error::Config("refresh_cycle_secs must be nonzero".into()));
        }
        Ok(())
    }
}
