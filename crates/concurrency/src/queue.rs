//! The bounded prefetch work queue: one producer (the master loop,
//! dispatching jobs from `get_site`) feeding N consumer worker threads,
//! each job carrying its own payload and freed on reply — ownership makes
//! the original's per-job memory pool unnecessary, so this is just a
//! bounded channel.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

/// One unit of dispatched work.
pub struct Job<T> {
    /// Monotonic id, used to match a [`JobOutcome`] back to its job.
    pub id: u64,
    /// The job's payload (e.g. a fetch request).
    pub payload: T,
}

/// A completed job's outcome.
pub enum JobOutcome<R> {
    /// The job ran to completion.
    Completed(R),
    /// The job failed; carries the classified error.
    Failed(shepherd_core::Error),
}

/// A bounded job queue with a shared result channel.
pub struct WorkQueue<T, R> {
    job_tx: mpsc::SyncSender<Job<T>>,
    job_rx: Arc<Mutex<mpsc::Receiver<Job<T>>>>,
    result_tx: mpsc::Sender<(u64, JobOutcome<R>)>,
    result_rx: mpsc::Receiver<(u64, JobOutcome<R>)>,
    next_id: u64,
}

impl<T: Send + 'static, R: Send + 'static> WorkQueue<T, R> {
    /// Create a queue bounded to `capacity` in-flight jobs.
    pub fn new(capacity: usize) -> WorkQueue<T, R> {
        let (job_tx, job_rx) = mpsc::sync_channel(capacity.max(1));
        let (result_tx, result_rx) = mpsc::channel();
        WorkQueue {
            job_tx,
            job_rx: Arc::new(Mutex::new(job_rx)),
            result_tx,
            result_rx,
            next_id: 0,
        }
    }

    /// Submit a job, blocking if the queue is at capacity. Returns the
    /// job's id.
    pub fn submit(&mut self, payload: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        // A full queue only ever unblocks when a worker drains it; this
        // is the scheduler's backpressure point.
        let _ = self.job_tx.send(Job { id, payload });
        id
    }

    /// A handle worker threads use to pull jobs and publish outcomes.
    pub fn worker_handle(&self) -> WorkerHandle<T, R> {
        WorkerHandle {
            job_rx: Arc::clone(&self.job_rx),
            result_tx: self.result_tx.clone(),
        }
    }

    /// Block for the next completed job's outcome.
    pub fn recv_result(&self) -> Option<(u64, JobOutcome<R>)> {
        self.result_rx.recv().ok()
    }

    /// Poll for a completed job's outcome without blocking.
    pub fn try_recv_result(&self) -> Option<(u64, JobOutcome<R>)> {
        self.result_rx.try_recv().ok()
    }
}

/// A worker's view of a [`WorkQueue`]: pull jobs, publish outcomes.
#[derive(Clone)]
pub struct WorkerHandle<T, R> {
    job_rx: Arc<Mutex<mpsc::Receiver<Job<T>>>>,
    result_tx: mpsc::Sender<(u64, JobOutcome<R>)>,
}

impl<T: Send + 'static, R: Send + 'static> WorkerHandle<T, R> {
    /// Block for the next job, or `None` once every [`WorkQueue`]
    /// producer handle has been dropped.
    pub fn recv(&self) -> Option<Job<T>> {
        self.job_rx.lock().unwrap().recv().ok()
    }

    /// Run one job through `f` and publish its outcome.
    pub fn run_one(&self, f: impl FnOnce(T) -> JobOutcome<R>) -> bool {
        match self.recv() {
            Some(job) => {
                let outcome = f(job.payload);
                let _ = self.result_tx.send((job.id, outcome));
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_then_worker_completes_and_result_is_matched() {
        let mut queue: WorkQueue<u32, u32> = WorkQueue::new(4);
        let worker = queue.worker_handle();
        let id = queue.submit(21);

        worker.run_one(|n| JobOutcome::Completed(n * 2));

        let (got_id, outcome) = queue.recv_result().unwrap();
        assert_eq!(got_id, id);
        match outcome {
            JobOutcome::Completed(v) => assert_eq!(v, 42),
            JobOutcome::Failed(_) => panic!("expected success"),
        }
    }

    #[test]
    fn failed_outcome_carries_the_error() {
        let mut queue: WorkQueue<u32, u32> = WorkQueue::new(4);
        let worker = queue.worker_handle();
        queue.submit(1);
        worker.run_one(|_| JobOutcome::Failed(shepherd_core::Error::DiskPressure("full".into())));
        let (_, outcome) = queue.recv_result().unwrap();
        assert!(matches!(outcome, JobOutcome::Failed(_)));
    }

    #[test]
    fn job_ids_are_monotonic() {
        let mut queue: WorkQueue<u32, u32> = WorkQueue::new(4);
        let a = queue.submit(1);
        let b = queue.submit(2);
        assert!(b > a);
    }

    #[test]
    fn try_recv_result_is_none_when_nothing_completed() {
        let queue: WorkQueue<u32, u32> = WorkQueue::new(4);
        assert!(queue.try_recv_result().is_none());
    }
}
