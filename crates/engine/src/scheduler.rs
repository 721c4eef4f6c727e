//! Background worker pool for flushes and compactions.
//!
//! Jobs name a column family and are deduplicated while queued. Flushes
//! always run before compactions because they unblock stalled writers. A
//! failed job is logged, retried after an exponential backoff, and counted;
//! the pool keeps running.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::Result;
use crate::DbInner;

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Job {
    Flush(u32),
    Compaction(u32),
}

#[derive(Default)]
struct Queue {
    flushes: VecDeque<u32>,
    compactions: VecDeque<u32>,
    running: usize,
    shutdown: bool,
}

impl Queue {
    fn is_idle(&self) -> bool {
        self.flushes.is_empty() && self.compactions.is_empty() && self.running == 0
    }

    fn push(&mut self, job: Job) -> bool {
        let (queue, id) = match job {
            Job::Flush(id) => (&mut self.flushes, id),
            Job::Compaction(id) => (&mut self.compactions, id),
        };
        if queue.contains(&id) {
            return false;
        }
        queue.push_back(id);
        true
    }

    fn pop(&mut self) -> Option<Job> {
        if let Some(id) = self.flushes.pop_front() {
            return Some(Job::Flush(id));
        }
        self.compactions.pop_front().map(Job::Compaction)
    }
}

pub(crate) struct Scheduler {
    queue: Mutex<Queue>,
    work_ready: Condvar,
    idle: Condvar,
    /// Backoff sleeps wait here so that shutdown can cut them short.
    backoff: Condvar,
    workers: Mutex<Vec<JoinHandle<()>>>,
    consecutive_failures: AtomicU64,
    total_failures: AtomicU64,
}

impl Scheduler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            queue: Mutex::new(Queue::default()),
            work_ready: Condvar::new(),
            idle: Condvar::new(),
            backoff: Condvar::new(),
            workers: Mutex::new(Vec::new()),
            consecutive_failures: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        })
    }

    /// Spawns `threads` workers. They hold the database weakly and exit once
    /// it is gone or [`Scheduler::shutdown`] is called.
    pub(crate) fn start(self: &Arc<Self>, db: Weak<DbInner>, threads: usize) -> Result<()> {
        let mut workers = self.workers.lock();
        for i in 0..threads.max(1) {
            let scheduler = Arc::clone(self);
            let db = db.clone();
            let handle = thread::Builder::new()
                .name(format!("shalekv-bg-{i}"))
                .spawn(move || scheduler.worker_loop(db))?;
            workers.push(handle);
        }
        debug!(threads = workers.len(), "background workers started");
        Ok(())
    }

    pub(crate) fn schedule(&self, job: Job) {
        let mut queue = self.queue.lock();
        if queue.shutdown {
            return;
        }
        if queue.push(job) {
            self.work_ready.notify_one();
        }
    }

    /// Blocks until no job is queued or running, or until some job has
    /// failed since the last success.
    pub(crate) fn wait_idle(&self) {
        let mut queue = self.queue.lock();
        while !queue.is_idle() && !queue.shutdown {
            if self.consecutive_failures.load(Ordering::Acquire) > 0 {
                return;
            }
            self.idle.wait(&mut queue);
        }
    }

    pub(crate) fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Drops queued jobs and joins every worker. Running jobs finish first.
    pub(crate) fn shutdown(&self) {
        {
            let mut queue = self.queue.lock();
            queue.shutdown = true;
            queue.flushes.clear();
            queue.compactions.clear();
            self.work_ready.notify_all();
            self.backoff.notify_all();
            self.idle.notify_all();
        }
        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if handle.join().is_err() {
                error!("background worker panicked");
            }
        }
    }

    fn next_job(&self) -> Option<Job> {
        let mut queue = self.queue.lock();
        loop {
            if queue.shutdown {
                return None;
            }
            if let Some(job) = queue.pop() {
                queue.running += 1;
                return Some(job);
            }
            self.work_ready.wait(&mut queue);
        }
    }

    fn finish_job(&self, retry: Option<Job>) {
        let mut queue = self.queue.lock();
        queue.running -= 1;
        if let Some(job) = retry {
            if !queue.shutdown && queue.push(job) {
                self.work_ready.notify_one();
            }
        }
        // waiters also re-check the failure count
        self.idle.notify_all();
    }

    fn worker_loop(&self, db: Weak<DbInner>) {
        while let Some(job) = self.next_job() {
            let result = match db.upgrade() {
                Some(db) => db.run_job(job),
                None => {
                    self.finish_job(None);
                    return;
                }
            };

            let retry = match result {
                Ok(()) => {
                    self.consecutive_failures.store(0, Ordering::Release);
                    None
                }
                Err(e) => {
                    let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                    self.total_failures.fetch_add(1, Ordering::Relaxed);
                    let backoff = backoff_for(failures);
                    error!(
                        ?job,
                        error = %e,
                        failures,
                        retry_in_ms = backoff.as_millis() as u64,
                        "background job failed"
                    );
                    self.sleep_unless_shutdown(backoff);
                    Some(job)
                }
            };
            self.finish_job(retry);
        }
    }

    fn sleep_unless_shutdown(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut queue = self.queue.lock();
        while !queue.shutdown {
            if self.backoff.wait_until(&mut queue, deadline).timed_out() {
                return;
            }
        }
    }
}

/// 100 ms after the first failure, doubling up to 10 s.
fn backoff_for(failures: u64) -> Duration {
    let shift = failures.saturating_sub(1).min(16) as u32;
    INITIAL_BACKOFF
        .saturating_mul(1u32 << shift)
        .min(MAX_BACKOFF)
}

impl DbInner {
    pub(crate) fn run_job(&self, job: Job) -> Result<()> {
        match job {
            Job::Flush(id) => match self.cf_by_id(id) {
                Some(cf) => self.flush_immutables(&cf),
                None => Ok(()),
            },
            Job::Compaction(id) => self.background_compaction(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_for(1), Duration::from_millis(100));
        assert_eq!(backoff_for(2), Duration::from_millis(200));
        assert_eq!(backoff_for(4), Duration::from_millis(800));
        assert_eq!(backoff_for(50), MAX_BACKOFF);
    }

    #[test]
    fn queue_dedups_and_prefers_flushes() {
        let mut q = Queue::default();
        assert!(q.push(Job::Compaction(1)));
        assert!(q.push(Job::Flush(2)));
        assert!(!q.push(Job::Flush(2)));
        assert!(q.push(Job::Flush(3)));
        assert_eq!(q.pop(), Some(Job::Flush(2)));
        assert_eq!(q.pop(), Some(Job::Flush(3)));
        assert_eq!(q.pop(), Some(Job::Compaction(1)));
        assert_eq!(q.pop(), None);
    }
}
