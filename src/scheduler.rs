//! Background job execution with a drained completion queue.
//!
//! Work runs on a fixed-size thread pool; each finished job deposits its
//! callback and result into a mutex-guarded queue. A single consumer drains
//! the entire queue once per tick and applies the callbacks, in FIFO order,
//! against a context value it owns. Nothing here guarantees ordering
//! between independent jobs, only among callbacks already enqueued when the
//! drain happens.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// A background job that could not produce its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The worker panicked; the payload message is preserved for the
    /// consumer to report.
    Panicked(String),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::Panicked(msg) => write!(f, "background job panicked: {}", msg),
        }
    }
}

impl std::error::Error for JobError {}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Counters for observing pool traffic.
#[derive(Default)]
struct PoolCounters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

/// Point-in-time copy of the pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
}

impl PoolStats {
    /// Jobs submitted but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.submitted.saturating_sub(self.completed + self.failed)
    }

    pub fn summary(&self) -> String {
        format!(
            "Jobs: {} submitted | {} completed | {} failed | {} in flight",
            self.submitted,
            self.completed,
            self.failed,
            self.in_flight()
        )
    }
}

/// A finished job waiting to be applied to the consumer's context.
type Continuation<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Bounded worker pool whose completions are polled by one consumer.
///
/// `C` is the context the consumer passes into [`WorkerPool::drain`]; it is
/// how completion callbacks reach mutable state without sharing it with the
/// workers. Workers themselves only ever touch the completion queue.
pub struct WorkerPool<C> {
    pool: ThreadPool,
    completed: Arc<Mutex<Vec<Continuation<C>>>>,
    counters: Arc<PoolCounters>,
}

impl<C: 'static> WorkerPool<C> {
    /// Build a pool with the given worker count; 0 means one per core.
    pub fn new(threads: usize) -> Result<Self, ThreadPoolBuildError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("landmass-worker-{}", i))
            .build()?;
        Ok(Self {
            pool,
            completed: Arc::new(Mutex::new(Vec::new())),
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Run `work` in the background and enqueue `(on_complete, result)` for
    /// the next drain. A panicking worker is captured and surfaced to the
    /// callback as [`JobError::Panicked`] instead of being lost.
    pub fn submit<T, W, K>(&self, work: W, on_complete: K)
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        K: FnOnce(&mut C, Result<T, JobError>) + Send + 'static,
    {
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        let completed = Arc::clone(&self.completed);
        let counters = Arc::clone(&self.counters);
        self.pool.spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(work))
                .map_err(|payload| JobError::Panicked(panic_message(payload)));
            let failed = result.is_err();
            let continuation: Continuation<C> = Box::new(move |ctx| on_complete(ctx, result));
            completed
                .lock()
                .expect("completion queue lock poisoned")
                .push(continuation);
            // Counters tick after the push so that a quiescent counter state
            // implies every callback is already visible to the next drain.
            if failed {
                counters.failed.fetch_add(1, Ordering::SeqCst);
            } else {
                counters.completed.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    /// Apply every callback enqueued so far, FIFO, on the calling thread.
    ///
    /// The whole queue snapshot is taken in one lock acquisition so a burst
    /// of completions cannot build an unbounded backlog across ticks.
    /// Returns how many callbacks ran.
    pub fn drain(&self, ctx: &mut C) -> usize {
        let batch = {
            let mut queue = self.completed.lock().expect("completion queue lock poisoned");
            std::mem::take(&mut *queue)
        };
        let count = batch.len();
        for continuation in batch {
            continuation(ctx);
        }
        count
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }
}
