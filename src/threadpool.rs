//! A small FIFO job-queue thread pool (spec.md §4.D, §9; SPEC_FULL.md §5),
//! translating `original_source/include/common/thread_pool.h`'s
//! `ConcurrentQueue` + `ThreadWorker` design to safe Rust: a `Mutex`-guarded
//! `VecDeque` plus a `Condvar` stands in for the C++ version's queue and
//! signal.
//!
//! Per-shard FIFO ordering is not a literal per-shard sub-queue here — every
//! job a converter submits writes to a disjoint file ordinal and publishes
//! "latest row" updates as a compare-and-replace-if-newer under the shard's
//! mutex, so jobs belonging to one shard commute. A single global FIFO queue,
//! drained by `POOL_THREAD_NUM` workers, is therefore sufficient to satisfy
//! "FIFO per shard, parallel across shards, join at shutdown".

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    shutdown: Mutex<bool>,
}

/// A fixed-size worker pool. Dropping it does not join workers; call
/// `shutdown` explicitly (as the orchestrator does from its own `shutdown`)
/// to wait for in-flight and queued jobs to drain.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "thread pool size must be positive");
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: Mutex::new(false),
        });

        let workers = (0..size)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || Self::worker_loop(shared))
            })
            .collect();

        Self { shared, workers }
    }

    fn worker_loop(shared: Arc<Shared>) {
        loop {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(job) = queue.pop_front() {
                    drop(queue);
                    job();
                    break;
                }
                if *shared.shutdown.lock().unwrap() {
                    return;
                }
                queue = shared.condvar.wait(queue).unwrap();
            }
        }
    }

    /// Enqueues `job`. Submission itself never blocks on queue depth — the
    /// spec's only backpressure point is the converter's own per-shard
    /// mutex, not this queue (§5: "submission blocks the submitter" refers
    /// to a saturated pool, which manifests as queued-but-not-yet-run jobs,
    /// not a bounded queue rejecting work).
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.queue.lock().unwrap().push_back(Box::new(job));
        self.shared.condvar.notify_one();
    }

    /// Signals shutdown and blocks until every queued job has run and every
    /// worker thread has exited. Called once, from the orchestrator's own
    /// `shutdown`, after `finalize()` has submitted every remaining job.
    pub fn shutdown(mut self) {
        *self.shared.shutdown.lock().unwrap() = true;
        self.shared.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_submitted_job() {
        let pool = ThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn jobs_for_one_shard_all_observe_final_state() {
        // Models the compare-and-replace-if-newer publication pattern: no
        // matter the interleaving, the maximum wins.
        let pool = ThreadPool::new(8);
        let latest = Arc::new(Mutex::new(0u64));
        for i in 0..50u64 {
            let latest = Arc::clone(&latest);
            pool.submit(move || {
                let mut slot = latest.lock().unwrap();
                if i > *slot {
                    *slot = i;
                }
            });
        }
        pool.shutdown();
        assert_eq!(*latest.lock().unwrap(), 49);
    }
}
