//! The master loop: sequences one reap cycle through every phase, watches
//! disk/bucket pressure on a timer, and exposes the hooks
//! `shepherd-server`'s control-TCP layer and the `shep` binary attach to. A
//! single-threaded async design on `tokio`'s `rt-multi-thread` runtime,
//! even though the loop itself never fans out across threads. The actual
//! per-phase work (planning,
//! reaping, merging,...) is supplied by a [`CycleDriver`] the caller wires
//! together from `shepherd-engine`'s stage functions and its `Gatherer`/
//! `ContentFilter`/`EquivStage` collaborators — this module only sequences
//! phases, persists `control`, and times the watchdog and checkpoint
//! cadence, the same separation of concerns the stage modules themselves
//! use for their own external collaborators.

use std::time::Duration;

use shepherd_core::{Config, Error, Result};
use shepherd_storage::state_dir::{Phase, StateDir};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{info, warn};

/// Startup predicate selected by the `shep` binary's CLI flags: which
/// phase, if any, to enter automatically on boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// `--keep`: stay in whatever phase `control` already names.
    Keep,
    /// `--locked`: come up holding the state lock but run nothing.
    Locked,
    /// `--idle`: come up in `Closed` and wait for a control request.
    Idle,
    /// `--private`: refuse `BORROW_STATE`/`SEND_MODE` from peers.
    Private,
    /// `--reap`: immediately begin a reap cycle.
    Reap,
    /// `--cleanup`: run `Cleanup` once, then idle.
    Cleanup,
}

impl StartupMode {
    /// Whether this mode should begin a reap cycle as soon as the event
    /// loop starts, versus waiting for a `MasterEvent::StartReap`.
    pub fn starts_reap_immediately(&self) -> bool {
        matches!(self, StartupMode::Reap)
    }

    /// Whether this mode accepts `BORROW_STATE`/`SEND_MODE` from peers.
    pub fn accepts_peers(&self) -> bool {
        !matches!(self, StartupMode::Private | StartupMode::Locked)
    }
}

/// A request delivered to the master loop from the control-TCP layer or
/// a CLI tool. `shepherd-server` translates wire requests into these;
/// this module stays ignorant of the wire format itself, which is what
/// keeps `shepherd-engine` from needing to depend on `shepherd-wire` or
/// `shepherd-server` (the dependency runs the other way).
#[derive(Debug)]
pub enum MasterEvent {
    /// Begin a reap cycle now, outside its normal schedule.
    StartReap,
    /// Re-read `Config` from disk and apply settings that can change
    /// without a restart.
    Reload,
    /// Orderly shutdown: finish any in-flight phase, then stop.
    Shutdown,
}

/// Disk/bucket watchdog: polled every `Config::bucket_watch_period_secs`,
/// compares free disk space and bucket-file headroom against the configured
/// floors.
#[derive(Debug, Clone, Copy)]
pub struct Watchdog {
    period: Duration,
    min_free_space_bytes: u64,
    min_bucket_reserve_bytes: u64,
}

impl Watchdog {
    /// Build a watchdog from config.
    pub fn from_config(cfg: &Config) -> Watchdog {
        Watchdog {
            period: Duration::from_secs(cfg.bucket_watch_period_secs.max(1)),
            min_free_space_bytes: cfg.min_free_space_bytes,
            min_bucket_reserve_bytes: cfg.min_bucket_reserve_bytes,
        }
    }

    /// Poll interval.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Check free bytes on the state directory's filesystem and the
    /// current bucket file length against the configured floors,
    /// returning `Error::DiskPressure` if either is breached.
    pub fn check(&self, free_bytes: u64, bucket_file_len: u64) -> Result<()> {
        if free_bytes < self.min_free_space_bytes {
            return Err(Error::DiskPressure(format!(
                "{free_bytes} bytes free, below floor {}",
                self.min_free_space_bytes
            )));
        }
        let headroom = free_bytes.saturating_sub(bucket_file_len);
        if headroom < self.min_bucket_reserve_bytes {
            return Err(Error::DiskPressure(format!(
                "{headroom} bytes of bucket headroom, below floor {}",
                self.min_bucket_reserve_bytes
            )));
        }
        Ok(())
    }
}

/// The per-phase work a reap cycle performs, supplied by the caller.
/// Each method runs while `control` already names the phase it
/// implements; [`run_cycle`] advances `control` between calls so a
/// crash mid-phase leaves an accurate resume point.
pub trait CycleDriver {
    /// Open a new working state from `current` (`Closed -> Prepare`).
    fn prepare(&mut self) -> Result<()>;
    /// Build the `plan` file (`Prepare -> Plan`).
    fn plan(&mut self) -> Result<()>;
    /// Run the reaper against `plan` (`Plan -> Reap`).
    fn reap(&mut self) -> Result<()>;
    /// Wind down in-flight jobs (`Reap -> Cork -> Corked`).
    fn cork(&mut self) -> Result<()>;
    /// Fold contributions into the index (`Corked -> Merge`).
    fn merge(&mut self) -> Result<()>;
    /// Run the external feedback collaborator (`Merge -> Feedback`).
    fn feedback(&mut self) -> Result<()>;
    /// Run the equivalence-stage collaborator (`Feedback -> Equiv`).
    fn equiv(&mut self) -> Result<()>;
    /// Compute OK/SLEEP/DISCARD dispositions (`Equiv -> Select`).
    fn select(&mut self) -> Result<()>;
    /// Materialise contributions into buckets (`Select -> Record`).
    fn record(&mut self) -> Result<()>;
    /// Impose the footprint-unique sort (`Record -> Sort`).
    fn sort(&mut self) -> Result<()>;
    /// Final housekeeping before promotion (`Sort -> Finish -> Closed`).
    fn finish(&mut self) -> Result<()>;
    /// Roll the working state back after an aborted cycle.
    fn rollback(&mut self) -> Result<()>;
}

/// Run one full reap cycle against `state_dir`, advancing `control`
/// between each [`CycleDriver`] call. On an error that
/// `Error::requires_rollback`, the working state is rolled back and the
/// cycle ends in `Closed`; any other error is propagated as-is, leaving
/// `control` at whatever phase failed, for crash recovery to resume
/// from.
pub fn run_cycle(state_dir: &mut StateDir, driver: &mut dyn CycleDriver) -> Result<()> {
    macro_rules! phase_step {
        ($phase:expr, $call:expr) => {{
            state_dir.set_phase($phase)?;
            if let Err(e) = $call {
                if e.requires_rollback() && $phase.can_advance_to(Phase::Rollback) {
                    warn!(error = %e, phase = ?$phase, "cycle aborted, rolling back");
                    state_dir.set_phase(Phase::Rollback)?;
                    driver.rollback()?;
                    state_dir.set_phase(Phase::Closed)?;
                }
                return Err(e);
            }
        }};
    }

    phase_step!(Phase::Prepare, driver.prepare());
    phase_step!(Phase::Plan, driver.plan());
    phase_step!(Phase::Reap, driver.reap());
    phase_step!(Phase::Cork, driver.cork());
    state_dir.set_phase(Phase::Corked)?;
    phase_step!(Phase::Merge, driver.merge());
    phase_step!(Phase::Feedback, driver.feedback());
    phase_step!(Phase::Equiv, driver.equiv());
    phase_step!(Phase::Select, driver.select());
    phase_step!(Phase::Record, driver.record());
    phase_step!(Phase::Sort, driver.sort());
    phase_step!(Phase::Finish, driver.finish());
    state_dir.set_phase(Phase::Closed)?;
    info!("reap cycle finished");
    Ok(())
}

/// Handle used by the control-TCP layer and CLI tools to drive the
/// master loop: a sender for [`MasterEvent`]s plus the `StartupMode`
/// the loop was booted with.
pub struct MasterHandle {
    events: mpsc::Sender<MasterEvent>,
    startup: StartupMode,
}

impl MasterHandle {
    /// The mode the loop was started with.
    pub fn startup_mode(&self) -> StartupMode {
        self.startup
    }

    /// Queue a `StartReap` event.
    pub async fn start_reap(&self) -> Result<()> {
        self.events
            .send(MasterEvent::StartReap)
            .await
            .map_err(|_| Error::InvalidTransition("master loop has shut down".into()))
    }

    /// Queue a `Reload` event.
    pub async fn reload(&self) -> Result<()> {
        self.events
            .send(MasterEvent::Reload)
            .await
            .map_err(|_| Error::InvalidTransition("master loop has shut down".into()))
    }

    /// Queue a `Shutdown` event.
    pub async fn shutdown(&self) -> Result<()> {
        self.events
            .send(MasterEvent::Shutdown)
            .await
            .map_err(|_| Error::InvalidTransition("master loop has shut down".into()))
    }
}

/// Run the master event loop until a `Shutdown` event arrives. On each
/// `StartReap` (including one synthesized immediately if `startup`
/// requests it) runs `run_cycle` via `new_driver`; on each watchdog
/// tick runs `watch` to check disk pressure; on `Reload` invokes
/// `on_reload`. Returns the event sender half as a [`MasterHandle`] the
/// caller hands to the control-TCP layer — so the loop itself is
/// spawned and the handle is what's shared.
pub async fn spawn_loop<F, W, R>(
    startup: StartupMode,
    cfg: Config,
    mut state_dir: StateDir,
    mut new_driver: F,
    mut watch: W,
    mut on_reload: R,
) -> (MasterHandle, tokio::task::JoinHandle<Result<()>>)
where
    F: FnMut() -> Box<dyn CycleDriver + Send> + Send + 'static,
    W: FnMut() -> Result<()> + Send + 'static,
    R: FnMut() + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(8);
    let handle = MasterHandle {
        events: tx.clone(),
        startup,
    };

    if startup.starts_reap_immediately() {
        let _ = tx.send(MasterEvent::StartReap).await;
    }

    let watchdog = Watchdog::from_config(&cfg);
    let join = tokio::spawn(async move {
        let mut ticker = interval(watchdog.period());
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(MasterEvent::StartReap) => {
                            let mut driver = new_driver();
                            if let Err(e) = run_cycle(&mut state_dir, driver.as_mut()) {
                                warn!(error = %e, "reap cycle failed");
                                if e.is_fatal() {
                                    return Err(e);
                                }
                            }
                        }
                        Some(MasterEvent::Reload) => {
                            on_reload();
                        }
                        Some(MasterEvent::Shutdown) | None => {
                            info!("master loop shutting down");
                            return Ok(());
                        }
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = watch() {
                        warn!(error = %e, "watchdog check failed");
                    }
                }
            }
        }
    });

    (handle, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingDriver {
        calls: Vec<&'static str>,
        fail_at: Option<&'static str>,
    }

    impl CycleDriver for RecordingDriver {
        fn prepare(&mut self) -> Result<()> {
            self.log_call("prepare")
        }
        fn plan(&mut self) -> Result<()> {
            self.log_call("plan")
        }
        fn reap(&mut self) -> Result<()> {
            self.log_call("reap")
        }
        fn cork(&mut self) -> Result<()> {
            self.log_call("cork")
        }
        fn merge(&mut self) -> Result<()> {
            self.log_call("merge")
        }
        fn feedback(&mut self) -> Result<()> {
            self.log_call("feedback")
        }
        fn equiv(&mut self) -> Result<()> {
            self.log_call("equiv")
        }
        fn select(&mut self) -> Result<()> {
            self.log_call("select")
        }
        fn record(&mut self) -> Result<()> {
            self.log_call("record")
        }
        fn sort(&mut self) -> Result<()> {
            self.log_call("sort")
        }
        fn finish(&mut self) -> Result<()> {
            self.log_call("finish")
        }
        fn rollback(&mut self) -> Result<()> {
            self.calls.push("rollback");
            Ok(())
        }
    }

    impl RecordingDriver {
        fn log_call(&mut self, name: &'static str) -> Result<()> {
            if self.fail_at == Some(name) {
                return Err(Error::InvariantViolation(format!("{name} failed")));
            }
            self.calls.push(name);
            Ok(())
        }
    }

    #[test]
    fn full_cycle_advances_through_every_phase() {
        let dir = tempdir().unwrap();
        let mut sd = StateDir::create(&dir.path().join("state")).unwrap();
        let mut driver = RecordingDriver::default();
        run_cycle(&mut sd, &mut driver).unwrap();
        assert_eq!(sd.phase().unwrap(), Phase::Closed);
        assert_eq!(
            driver.calls,
            vec![
                "prepare", "plan", "reap", "cork", "merge", "feedback", "equiv", "select",
                "record", "sort", "finish"
            ]
        );
    }

    #[test]
    fn rollback_requiring_error_rolls_back_to_closed() {
        let dir = tempdir().unwrap();
        let mut sd = StateDir::create(&dir.path().join("state")).unwrap();
        let mut driver = RecordingDriver {
            fail_at: Some("merge"),
            ..Default::default()
        };
        let err = run_cycle(&mut sd, &mut driver).unwrap_err();
        assert!(err.requires_rollback());
        assert_eq!(sd.phase().unwrap(), Phase::Closed);
        assert!(driver.calls.contains(&"rollback"));
    }

    #[test]
    fn watchdog_trips_below_free_space_floor() {
        let cfg = Config {
            min_free_space_bytes: 1_000_000,
            min_bucket_reserve_bytes: 0,
            ..Config::default()
        };
        let wd = Watchdog::from_config(&cfg);
        assert!(wd.check(500_000, 0).is_err());
        assert!(wd.check(2_000_000, 0).is_ok());
    }

    #[test]
    fn startup_mode_private_refuses_peers() {
        assert!(!StartupMode::Private.accepts_peers());
        assert!(StartupMode::Idle.accepts_peers());
    }

    #[tokio::test]
    async fn spawn_loop_runs_immediate_reap_then_shuts_down_on_request() {
        let dir = tempdir().unwrap();
        let sd = StateDir::create(&dir.path().join("state")).unwrap();
        let cfg = Config {
            bucket_watch_period_secs: 3600,
            ..Config::default()
        };
        let (handle, join) = spawn_loop(
            StartupMode::Reap,
            cfg,
            sd,
            || Box::new(RecordingDriver::default()),
            || Ok(()),
            || {},
        )
        .await;
        handle.shutdown().await.unwrap();
        let result = join.await.unwrap();
        assert!(result.is_ok());
    }
}
