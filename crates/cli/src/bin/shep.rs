//! `shep`: the Shepherd master daemon. Loads a `Config`, opens (or expects
//! already-open) a state directory, spawns the control-TCP listener, and
//! drives the reap-cycle loop end-to-end by wiring every engine stage
//! behind `shepherd_engine::master::CycleDriver`. Real fetching is out of
//! scope, so this binary's `Gatherer` is a local stub that always succeeds
//! with an empty body — enough to drive the pipeline's shape without a real
//! network.

use anyhow::{Context, Result};
use clap::Parser;
use shepherd_core::config::Config;
use shepherd_core::footprint::Footprint;
use shepherd_core::plan::Plan;
use shepherd_durability::checkpoint::CheckpointLog;
use shepherd_durability::recovery::{rollback_to_checkpoint, CheckpointedFiles};
use shepherd_engine::equiv::{EquivStage, PassthroughEquiv};
use shepherd_engine::master::{spawn_loop, CycleDriver, StartupMode};
use shepherd_engine::planner::Planner;
use shepherd_engine::reap::{FetchError, FetchOutcome, FetchRequest, Gatherer};
use shepherd_engine::site_table::SiteTable;
use shepherd_engine::{merge, reap, record, select, sort};
use shepherd_server::{flags::DaemonFlags, listener};
use shepherd_storage::bucket::BucketStore;
use shepherd_storage::contrib_store::ContribStore;
use shepherd_storage::index::UrlIndex;
use shepherd_storage::sort::InMemorySorter;
use shepherd_storage::state_dir::{files, StateDir};
use shepherd_storage::urldb::UrlDb;
use shepherd_core::Checkpoint;
use std::collections::HashSet;
use std::path::PathBuf;

/// A `Gatherer` that always succeeds with an empty body, standing in
/// for the real prefetch subsystem this daemon schedules but does not
/// implement.
struct StubGatherer;

impl Gatherer for StubGatherer {
    fn fetch(&self, _request: &FetchRequest) -> std::result::Result<FetchOutcome, FetchError> {
        Ok(FetchOutcome {
            download_time_tenths: 1,
            body: Vec::new(),
        })
    }
}

/// Wires every engine stage against one open state directory. One
/// instance is built fresh per reap cycle by `new_driver` in
/// `spawn_loop`, matching `master::run_cycle`'s phase-by-phase call
/// pattern.
struct DaemonDriver {
    cfg: Config,
    state_dir: StateDir,
    index: UrlIndex,
    sites: SiteTable,
    contrib: ContribStore,
    buckets: BucketStore,
    urldb: Option<UrlDb>,
    checkpoints: CheckpointLog,
    plan: Plan,
    records: Vec<shepherd_core::UrlState>,
    fetch_results: std::collections::HashMap<Footprint, (FetchOutcome, String)>,
    auto_go_root_fps: HashSet<Footprint>,
}

impl DaemonDriver {
    fn open(cfg: Config, state_dir_path: &std::path::Path) -> Result<DaemonDriver> {
        let state_dir = StateDir::open(state_dir_path)?;
        let index = UrlIndex::open(&state_dir.file(files::INDEX), true)?;
        let sites = {
            let mut f = std::fs::File::open(state_dir.file(files::SITES))
                .context("opening sites file")?;
            SiteTable::load(&mut f)?
        };
        let contrib = ContribStore::open(&state_dir.file(files::CONTRIB), true, cfg.contrib_cache_size)?;
        let buckets = BucketStore::open(
            &state_dir.file(files::BUCKETS),
            true,
            u64::MAX,
            cfg.shake_buf_size as u64,
        )?;
        let urldb_path = state_dir.file(files::URLS);
        let urldb = if urldb_path.exists() {
            Some(UrlDb::open(&urldb_path, true)?)
        } else {
            None
        };
        let checkpoints = CheckpointLog::open(&state_dir.file(files::CHECKPOINT), true)?;

        Ok(DaemonDriver {
            cfg,
            state_dir,
            index,
            sites,
            contrib,
            buckets,
            urldb,
            checkpoints,
            plan: Vec::new(),
            records: Vec::new(),
            fetch_results: std::collections::HashMap::new(),
            auto_go_root_fps: HashSet::new(),
        })
    }

    fn checkpoint(&mut self) -> shepherd_core::Result<()> {
        let file_len = |name: &str| -> u64 {
            std::fs::metadata(self.state_dir.file(name)).map(|m| m.len()).unwrap_or(0)
        };
        let cp = Checkpoint {
            time: now_secs(),
            buckets_pos: file_len(files::BUCKETS),
            journal_pos: file_len(files::JOURNAL),
            contrib_pos: self.contrib.len(),
            urls_pos: file_len(files::URLS),
        };
        self.checkpoints.append(&cp)
    }
}

fn now_secs() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

impl CycleDriver for DaemonDriver {
    fn prepare(&mut self) -> shepherd_core::Result<()> {
        self.records = self.index.iter()?;
        Ok(())
    }

    fn plan(&mut self) -> shepherd_core::Result<()> {
        let now = now_secs();
        let planner = Planner::new(&self.cfg);
        let candidates = self.records.clone().into_iter().map(Ok);
        let planner_random: u32 = rand::random();
        let (plan, _stats) = planner.build_plan(&self.sites, candidates, now, planner_random)?;
        self.plan = plan;
        Ok(())
    }

    fn reap(&mut self) -> shepherd_core::Result<()> {
        let jobs = reap::run_cycle(&self.cfg, &self.plan, &StubGatherer)?;
        for job in jobs {
            if let Ok(outcome) = job.result {
                self.fetch_results.insert(job.request.fp, (outcome, String::new()));
            }
        }
        Ok(())
    }

    fn cork(&mut self) -> shepherd_core::Result<()> {
        Ok(())
    }

    fn merge(&mut self) -> shepherd_core::Result<()> {
        // Candidates were already filtered through `verify_contrib` and
        // deduped against the store's hash when they were added; a
        // merge pass only needs to fold them against the index. Track
        // which footprints arrived tagged `AUTO_GO_ROOT` before handing
        // the contributions to `merge::merge`, which consumes them.
        let existing_fps: HashSet<Footprint> = self.records.iter().map(|r| r.fp).collect();
        let mut contributions = Vec::new();
        let mut auto_go_root_fps = HashSet::new();
        for rec in self.contrib.scan()? {
            let rec = rec?;
            if rec.flags.contains(shepherd_core::contrib::ContribFlags::AUTO_GO_ROOT) {
                auto_go_root_fps.insert(rec.fp);
            }
            contributions.push(Ok(rec));
        }
        let (new_records, stats) = merge::merge(
            contributions.into_iter(),
            &self.sites,
            &existing_fps,
            &self.cfg,
            None,
        )?;
        self.auto_go_root_fps = auto_go_root_fps;
        for rec in &new_records {
            self.index.append(rec)?;
        }
        self.records.extend(new_records);
        tracing::info!(new = stats.new_records, duplicates = stats.duplicates_folded, "merge pass complete");
        Ok(())
    }

    fn feedback(&mut self) -> shepherd_core::Result<()> {
        Ok(())
    }

    fn equiv(&mut self) -> shepherd_core::Result<()> {
        let equiv = PassthroughEquiv;
        equiv.resolve(&mut self.sites)?;
        Ok(())
    }

    fn select(&mut self) -> shepherd_core::Result<()> {
        let now = now_secs();
        let records = std::mem::take(&mut self.records);
        let (survivors, counters) = select::select_all(records, &mut self.sites, &self.cfg, now, None)?;
        self.records = survivors;
        tracing::info!(
            kept = counters.kept,
            discarded = counters.discarded,
            slept = counters.slept,
            pruned = counters.sites_pruned,
            "select pass complete"
        );
        Ok(())
    }

    fn record(&mut self) -> shepherd_core::Result<()> {
        let stats = record::record_pass(
            &mut self.records,
            &self.fetch_results,
            &self.auto_go_root_fps,
            &self.sites,
            &mut self.buckets,
            self.urldb.as_mut(),
        )?;
        tracing::info!(materialised = stats.materialised, synthesized = stats.synthesized, "record pass complete");
        for (i, rec) in self.records.iter().enumerate() {
            if (i as u64) < self.index.len() {
                self.index.set(i as u64, rec)?;
            }
        }
        Ok(())
    }

    fn sort(&mut self) -> shepherd_core::Result<()> {
        let sorter = InMemorySorter;
        sort::sort_index(&mut self.index, &sorter, &mut self.state_dir)?;
        Ok(())
    }

    fn finish(&mut self) -> shepherd_core::Result<()> {
        let mut f = std::fs::File::create(self.state_dir.file(files::SITES))?;
        self.sites.save(&mut f)?;
        self.checkpoint()?;
        Ok(())
    }

    fn rollback(&mut self) -> shepherd_core::Result<()> {
        if self.checkpoints.is_empty() {
            return Ok(());
        }
        let cp = self.checkpoints.latest()?;
        let buckets_path = self.state_dir.file(files::BUCKETS);
        let journal_path = self.state_dir.file(files::JOURNAL);
        let contrib_path = self.state_dir.file(files::CONTRIB);
        let urls_path = self.state_dir.file(files::URLS);
        let checkpoint_files = CheckpointedFiles {
            buckets: &buckets_path,
            journal: &journal_path,
            contrib: &contrib_path,
            urls: &urls_path,
        };
        rollback_to_checkpoint(&checkpoint_files, &cp)
    }
}

/// The Shepherd master daemon: plans, reaps, merges, selects, records
/// and sorts one reap cycle at a time, serving the control protocol
/// alongside it.
#[derive(Parser, Debug)]
#[command(name = "shep", version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Path to the state directory to serve.
    #[arg(long)]
    state: PathBuf,

    /// Start with state locked against remote borrowing.
    #[arg(long)]
    keep: bool,

    /// Start in locked (no control-TCP) mode.
    #[arg(long)]
    locked: bool,

    /// Start idle: accept connections but don't reap immediately.
    #[arg(long)]
    idle: bool,

    /// Start private: refuse BORROW_STATE/SEND_MODE from peers.
    #[arg(long)]
    private: bool,

    /// Start a reap cycle immediately on boot.
    #[arg(long)]
    reap: bool,

    /// Run pending cleanup before serving.
    #[arg(long)]
    cleanup: bool,
}

impl Args {
    fn startup_mode(&self) -> StartupMode {
        if self.keep {
            StartupMode::Keep
        } else if self.locked {
            StartupMode::Locked
        } else if self.cleanup {
            StartupMode::Cleanup
        } else if self.private {
            StartupMode::Private
        } else if self.reap {
            StartupMode::Reap
        } else {
            StartupMode::Idle
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let cfg = Config::from_file(&args.config).context("loading configuration")?;
    cfg.validate().context("validating configuration")?;

    let state_dir = StateDir::open(&args.state).context("opening state directory")?;
    drop(state_dir);

    let flags = DaemonFlags::new();
    if args.private {
        flags.set_private(true);
    }
    if args.cleanup {
        flags.set_cleanup_pending(true);
    }

    let startup = args.startup_mode();
    let cfg_for_driver = cfg.clone();
    let state_path = args.state.clone();
    let (handle, join) = spawn_loop(
        startup,
        cfg.clone(),
        StateDir::open(&args.state)?,
        move || {
            let driver = DaemonDriver::open(cfg_for_driver.clone(), &state_path)
                .expect("reopening state directory for a new cycle");
            Box::new(driver) as Box<dyn CycleDriver + Send>
        },
        {
            let watchdog = shepherd_engine::master::Watchdog::from_config(&cfg);
            let state_path = args.state.clone();
            move || {
                let free = fs2::available_space(&state_path).unwrap_or(u64::MAX);
                let bucket_len = std::fs::metadata(state_path.join(files::BUCKETS))
                    .map(|m| m.len())
                    .unwrap_or(0);
                watchdog.check(free, bucket_len)
            }
        },
        || {
            tracing::info!("reload requested");
        },
    )
    .await;

    if matches!(startup, StartupMode::Locked) {
        tracing::info!("started in locked mode; control server disabled");
        join.await??;
        return Ok(());
    }

    let listener_task = tokio::spawn(listener::run(cfg, flags, args.state.clone()));

    tokio::select! {
        res = join => { res??; }
        res = listener_task => { res??; }
    }

    let _ = handle.startup_mode();
    Ok(())
}
