//! The reap job life cycle: turns a [`Plan`] into dispatched fetch jobs
//! over [`shepherd_concurrency::reaper::Scheduler`] and
//! [`shepherd_concurrency::queue::WorkQueue`], classifies outcomes into a
//! 5-way error split, and checkpoints periodically.

use shepherd_concurrency::queue::{JobOutcome, WorkQueue};
use shepherd_concurrency::reaper::{QsiteId, Scheduler};
use shepherd_core::plan::{Plan, PlanEntry};
use shepherd_core::qkey::Qkey;
use shepherd_core::url_state::Oid;
use shepherd_core::{Config, Error, Result};
use tracing::{debug, warn};

/// One dispatched fetch request, built by [`job_prepare_request`].
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Queueing key the request is dispatched under.
    pub qkey: Qkey,
    /// The URL's footprint, so the caller can join the outcome back to
    /// its index record without a separate lookup.
    pub fp: shepherd_core::footprint::Footprint,
    /// Bucket id of the previous download, or `UNDEFINED` for a new URL.
    pub oid: Oid,
    /// True if this request is for a site's `/robots.txt`.
    pub is_robots: bool,
    /// Carried over so the worker can report it back unchanged.
    pub retry_count: u8,
}

/// A successful fetch's result, handed to the merge stage.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Download duration, 0.1s units.
    pub download_time_tenths: u32,
    /// Bytes downloaded, stored verbatim in the new bucket.
    pub body: Vec<u8>,
}

/// The 5-way classification of a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network-level failure (DNS, connect, timeout); retried up to
    /// `Config::req_err_retry` times before promoting to `PermConnection`.
    TempConnection,
    /// HTTP-level failure with no final status (truncated response,
    /// etc.); same retry handling as `TempConnection`.
    TempRequest,
    /// Connection-level failure exhausted its retries.
    PermConnection(u32),
    /// Request-level failure exhausted its retries, or an immediate
    /// permanent HTTP status (404, etc).
    PermRequest(u32),
}

/// The external collaborator that performs an actual fetch.
pub trait Gatherer: Send + Sync {
    /// Perform one fetch.
    fn fetch(&self, request: &FetchRequest) -> std::result::Result<FetchOutcome, FetchError>;
}

/// Build the [`FetchRequest`] for one plan entry.
pub fn job_prepare_request(qkey: Qkey, entry: &PlanEntry) -> FetchRequest {
    FetchRequest {
        qkey,
        fp: entry.fp,
        oid: entry.oid,
        is_robots: entry.flags.contains(shepherd_core::plan::PlanEntryFlags::ROBOTS),
        retry_count: entry.retry_count,
    }
}

/// Resolve a raw [`FetchError`] plus the record's accumulated retry
/// count into a final classification, escalating to the permanent
/// variant once `Config::req_err_retry` is exceeded.
pub fn classify_error(err: FetchError, retry_count: u8, cfg: &Config) -> FetchError {
    let exhausted = retry_count >= cfg.req_err_retry;
    match (err, exhausted) {
        (FetchError::TempConnection, true) => FetchError::PermConnection(0),
        (FetchError::TempRequest, true) => FetchError::PermRequest(0),
        (other, _) => other,
    }
}

/// One completed job, as handed off to the merge stage.
pub struct JobRecord {
    /// The dispatched request.
    pub request: FetchRequest,
    /// Success or a classified failure.
    pub result: std::result::Result<FetchOutcome, FetchError>,
}

/// Drives one reap cycle's dispatch loop: schedules every plan block's
/// entries through a [`Scheduler`], runs each job through `gatherer`
/// (inline — no worker pool; see module docs on why threading is a
/// thin layer over [`WorkQueue`] rather than built into this loop),
/// classifies failures, and returns every job's outcome in dispatch
/// order.
///
/// Checkpointing and shutdown escalation are the master loop's
/// responsibility; this function focuses purely on job dispatch so it stays
/// testable without a real clock or real I/O.
pub fn run_cycle(
    cfg: &Config,
    plan: &Plan,
    gatherer: &dyn Gatherer,
) -> Result<Vec<JobRecord>> {
    let mut scheduler = Scheduler::new();
    // cursor[i] = next not-yet-dispatched entry index within plan[i].
    let mut cursors: Vec<usize> = vec![0; plan.len()];
    let mut qsite_to_block: std::collections::HashMap<QsiteId, usize> =
        std::collections::HashMap::new();

    for (i, block) in plan.iter().enumerate() {
        if block.entries.is_empty() {
            continue;
        }
        let id = scheduler.insert(
            block.qkey,
            block.delay_secs,
            block.entries[0].priority,
            block.entries.len() as u32,
        );
        qsite_to_block.insert(id, i);
    }

    let mut results = Vec::new();
    let mut now: u64 = 0;
    let mut consecutive_failures = 0u32;

    loop {
        scheduler.time_step(now);
        let Some(id) = scheduler.get_site() else {
            if scheduler.len() == 0 {
                break;
            }
            now += 1;
            continue;
        };
        let block_idx = qsite_to_block[&id];
        let block = &plan[block_idx];
        let cursor = cursors[block_idx];
        let entry = &block.entries[cursor];
        let request = job_prepare_request(block.qkey, entry);

        let result = gatherer.fetch(&request).map_err(|e| classify_error(e, entry.retry_count, cfg));
        match &result {
            Ok(_) => {
                consecutive_failures = 0;
                debug!(oid = entry.oid.0, "fetch succeeded");
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(oid = entry.oid.0, error = ?e, "fetch failed");
                if consecutive_failures as u64 > cfg.safety_brake_limit {
                    return Err(Error::SafetyBrakeTripped {
                        lost: consecutive_failures as u64,
                        limit: cfg.safety_brake_limit,
                    });
                }
            }
        }
        results.push(JobRecord { request, result });

        cursors[block_idx] += 1;
        let remaining = (block.entries.len() - cursors[block_idx]) as u32;
        let next_priority = if remaining > 0 {
            block.entries[cursors[block_idx]].priority
        } else {
            0
        };
        scheduler.put_site(id, now, remaining, next_priority);
        if remaining == 0 {
            scheduler.remove(id);
        }
    }

    Ok(results)
}

/// Drain a [`WorkQueue`]'s completed results into [`JobRecord`]s,
/// classifying any worker-reported error. Used when
/// `Config::prefetch_threads` is nonzero and jobs run on a background
/// pool instead of inline via [`run_cycle`].
pub fn collect_queue_results(
    cfg: &Config,
    queue: &WorkQueue<FetchRequest, FetchOutcome>,
    pending_requests: &std::collections::HashMap<u64, FetchRequest>,
    count: usize,
) -> Vec<JobRecord> {
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let Some((id, outcome)) = queue.recv_result() else {
            break;
        };
        let Some(request) = pending_requests.get(&id).cloned() else {
            continue;
        };
        let result = match outcome {
            JobOutcome::Completed(o) => Ok(o),
            JobOutcome::Failed(Error::DiskPressure(_)) => {
                Err(classify_error(FetchError::TempConnection, request.retry_count, cfg))
            }
            JobOutcome::Failed(_) => {
                Err(classify_error(FetchError::TempRequest, request.retry_count, cfg))
            }
        };
        out.push(JobRecord { request, result });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shepherd_core::plan::{PlanBlock, PlanEntryFlags};
    use shepherd_core::qkey::Skey;

    struct AlwaysOk;
    impl Gatherer for AlwaysOk {
        fn fetch(&self, _req: &FetchRequest) -> std::result::Result<FetchOutcome, FetchError> {
            Ok(FetchOutcome {
                download_time_tenths: 5,
                body: vec![1, 2, 3],
            })
        }
    }

    struct AlwaysFails;
    impl Gatherer for AlwaysFails {
        fn fetch(&self, _req: &FetchRequest) -> std::result::Result<FetchOutcome, FetchError> {
            Err(FetchError::TempConnection)
        }
    }

    fn block(qkey: Qkey, n: usize) -> PlanBlock {
        PlanBlock {
            qkey,
            robot_oid: Oid::UNDEFINED,
            delay_secs: 0,
            entries: (0..n)
                .map(|i| shepherd_core::plan::PlanEntry {
                    fp: shepherd_core::footprint::Footprint::new([i as u8; 16], [0u8; 16]),
                    oid: Oid(i as u32),
                    priority: (n - i) as u32,
                    retry_count: 0,
                    weight: 100,
                    flags: PlanEntryFlags::empty(),
                    section: 0,
                    area: 0,
                })
                .collect(),
        }
    }

    #[test]
    fn run_cycle_dispatches_every_entry_across_all_blocks() {
        let cfg = Config::default();
        let plan = vec![
            block(Qkey::new(0, 80, Skey(1)), 2),
            block(Qkey::new(0, 80, Skey(2)), 3),
        ];
        let results = run_cycle(&cfg, &plan, &AlwaysOk).unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.result.is_ok()));
    }

    #[test]
    fn temp_connection_escalates_to_permanent_after_retry_exhaustion() {
        let cfg = Config::default();
        let classified = classify_error(FetchError::TempConnection, cfg.req_err_retry, &cfg);
        assert!(matches!(classified, FetchError::PermConnection(_)));
    }

    #[test]
    fn temp_connection_stays_temporary_before_retry_exhaustion() {
        let cfg = Config::default();
        let classified = classify_error(FetchError::TempConnection, 0, &cfg);
        assert_eq!(classified, FetchError::TempConnection);
    }

    #[test]
    fn blocks_sharing_a_qkey_still_dispatch_every_entry_without_overlap() {
        let cfg = Config::default();
        let shared = Qkey::new(0, 80, Skey(7));
        let plan = vec![block(shared, 2), block(shared, 3)];
        let results = run_cycle(&cfg, &plan, &AlwaysOk).unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.result.is_ok()));
    }

    #[test]
    fn safety_brake_trips_on_sustained_failure() {
        let mut cfg = Config::default();
        cfg.safety_brake_limit = 2;
        let plan = vec![block(Qkey::new(0, 80, Skey(1)), 5)];
        let err = run_cycle(&cfg, &plan, &AlwaysFails).unwrap_err();
        assert!(matches!(err, Error::SafetyBrakeTripped { .. }));
    }
}
