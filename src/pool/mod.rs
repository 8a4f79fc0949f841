//! Fixed-size thread pool draining a sharded queue.
//!
//! Workers greedily pop until the queue looks empty, then fall back to a
//! short-wait blocking pop. Submissions from inside the pool are detected
//! through a per-thread tag and use the eviction-exchange push so that
//! pool-internal recursion cannot grow storage without bound: when the
//! queue is full the producer executes the evicted task itself.
//!
//! A panic escaping a task is fatal. Tasks that carry fallible work route
//! results and panics through [`crate::future::PackagedTask`] instead.

mod queue;
mod segment;

use self::queue::SharedQueue;
use crate::config::PoolConfig;
use crate::executor::Executor;
use crate::task::Task;
use parking_lot::{Mutex, MutexGuard};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Policy applied when backing storage is full at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPolicy {
    /// Reserved. Submitting with this policy is an invariant violation.
    BlockWhenFull,
    /// On a pool thread, use the eviction-exchange push (the evicted task
    /// runs synchronously on the submitter). Elsewhere, behaves like
    /// [`SubmitPolicy::NeverBlock`].
    DispatchWhenFull,
    /// Grow segment storage as needed. Never drops, never blocks, may
    /// allocate.
    NeverBlock,
}

const STATE_RUNNING: u8 = 0;
const STATE_DONE: u8 = 1;

/// Backoff while stealing against an empty queue.
const STEAL_BACKOFF: Duration = Duration::from_micros(1);

thread_local! {
    /// Identity of the pool the current thread belongs to, or zero.
    ///
    /// Per pool, not a global: the tag is the address of the pool's shared
    /// inner, so a thread can only ever match the pool that spawned it.
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

pub(crate) struct PoolInner {
    queue: SharedQueue,
    state: AtomicU8,
}

impl PoolInner {
    fn id(&self) -> usize {
        self as *const Self as usize
    }

    fn is_pool_thread(&self) -> bool {
        CURRENT_POOL.with(|tag| tag.get() == self.id())
    }

    fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) == STATE_DONE
    }

    fn submit(&self, task: Task, policy: SubmitPolicy) {
        if self.is_done() {
            return; // silent no-op after shutdown
        }
        match policy {
            SubmitPolicy::BlockWhenFull => {
                unimplemented!("BlockWhenFull submission policy");
            }
            SubmitPolicy::DispatchWhenFull if self.is_pool_thread() => {
                self.queue.non_blocking_push(task);
            }
            SubmitPolicy::DispatchWhenFull | SubmitPolicy::NeverBlock => {
                self.queue.push_with_possible_resize(task);
            }
        }
    }

    fn try_run_one(&self) -> bool {
        if self.is_done() {
            return false;
        }
        match self.queue.try_pop() {
            Some(task) => {
                run_task(task);
                true
            }
            None => false,
        }
    }

    fn worker_loop(&self, index: usize) {
        CURRENT_POOL.with(|tag| tag.set(self.id()));
        tracing::debug!(worker = index, pool = self.id(), "pool worker started");
        loop {
            // Greedy drain, then fall back to the short-wait blocking pop.
            while let Some(task) = self.queue.try_pop() {
                run_task(task);
            }
            match self.queue.blocking_pop() {
                Some(task) => run_task(task),
                None => break, // done and drained
            }
        }
        tracing::debug!(worker = index, "pool worker stopped");
    }
}

/// Runs a task, treating an escaping panic as fatal.
fn run_task(task: Task) {
    if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
        tracing::error!("panic escaped a pool task; aborting");
        std::process::abort();
    }
}

/// A fixed worker set draining a sharded queue.
///
/// Dropping the pool disposes it: queued tasks are drained, workers are
/// joined, and later submissions become silent no-ops.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl ThreadPool {
    /// Creates a pool with default tuning
    /// (`thread_count = available parallelism`, `n_segments = 2 * threads`,
    /// `segment_capacity = 256`).
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&PoolConfig::default())
    }

    /// Creates a pool with explicit tuning. Zero-valued knobs fall back to
    /// their defaults, mirroring [`PoolConfig::default`].
    #[must_use]
    pub fn with_config(config: &PoolConfig) -> Self {
        let defaults = PoolConfig::default();
        let thread_count = if config.thread_count == 0 {
            defaults.thread_count
        } else {
            config.thread_count
        };
        let n_segments = if config.n_segments == 0 {
            2 * thread_count
        } else {
            config.n_segments
        };
        let segment_capacity = if config.segment_capacity == 0 {
            defaults.segment_capacity
        } else {
            config.segment_capacity
        };

        let inner = Arc::new(PoolInner {
            queue: SharedQueue::new(n_segments, segment_capacity),
            state: AtomicU8::new(STATE_RUNNING),
        });

        let mut workers = Vec::with_capacity(thread_count);
        for index in 0..thread_count {
            let inner = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("weft-worker-{index}"))
                .spawn(move || inner.worker_loop(index))
                .expect("failed to spawn pool worker thread");
            workers.push(handle);
        }

        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Posts a task with the [`SubmitPolicy::DispatchWhenFull`] policy.
    pub fn post(&self, task: Task) {
        self.inner.submit(task, SubmitPolicy::DispatchWhenFull);
    }

    /// Posts a task under an explicit submission policy.
    ///
    /// [`SubmitPolicy::BlockWhenFull`] is reserved and panics.
    pub fn post_with_policy(&self, task: Task, policy: SubmitPolicy) {
        self.inner.submit(task, policy);
    }

    /// Runs the task inline when called from a pool thread, otherwise
    /// posts it.
    pub fn dispatch(&self, task: Task) {
        if self.inner.is_done() {
            return;
        }
        if self.inner.is_pool_thread() {
            run_task(task);
        } else {
            self.post(task);
        }
    }

    /// Posts a task that must never execute inline on the submitter
    /// ([`SubmitPolicy::NeverBlock`]).
    pub fn defer(&self, task: Task) {
        self.inner.submit(task, SubmitPolicy::NeverBlock);
    }

    /// Steals one queued task and runs it. Returns `true` iff a task ran.
    pub fn try_run_one(&self) -> bool {
        self.inner.try_run_one()
    }

    /// Runs queued tasks until `pred` returns `true`, sleeping briefly
    /// whenever the queue is empty.
    ///
    /// This is the building block for cooperative waits: the caller makes
    /// progress on pool work instead of blocking outright.
    pub fn steal_tasks_until<F>(&self, mut pred: F)
    where
        F: FnMut() -> bool,
    {
        while !pred() {
            if !self.try_run_one() {
                thread::sleep(STEAL_BACKOFF);
            }
        }
    }

    /// Acquires `mutex`, running pool tasks while the lock is contended.
    ///
    /// Latency can be high if a long task is stolen while waiting, and
    /// holding several cooperative locks at once invites deadlock.
    pub fn lock_cooperatively<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        let mut attempts: u64 = 0;
        loop {
            if let Some(guard) = mutex.try_lock() {
                return guard;
            }
            attempts += 1;
            if attempts < 4 {
                continue;
            }
            if self.try_run_one() {
                continue;
            }
            if attempts < 64 {
                thread::yield_now();
            } else {
                thread::sleep(Duration::from_nanos(2000));
            }
        }
    }

    /// Returns `true` iff the calling thread is one of this pool's workers.
    #[must_use]
    pub fn is_pool_thread(&self) -> bool {
        self.inner.is_pool_thread()
    }

    /// Number of tasks currently queued.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.inner.queue.size()
    }

    /// Current total queue capacity across all segments.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.inner.queue.capacity()
    }

    /// Drains queued tasks, joins the workers, and rejects further
    /// submissions. Idempotent; later calls return immediately.
    pub fn dispose(&self) {
        let old = self.inner.state.swap(STATE_DONE, Ordering::AcqRel);
        if old == STATE_DONE {
            return;
        }
        tracing::debug!(pool = self.inner.id(), "pool disposing");
        self.inner.queue.signal_done();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                tracing::error!("pool worker terminated by panic");
            }
        }
    }

    /// Returns a cheap executor handle for this pool.
    #[must_use]
    pub fn executor(&self) -> PoolExecutor {
        PoolExecutor {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A cloneable [`Executor`] handle onto a [`ThreadPool`].
///
/// The handle keeps the pool's queue alive but does not keep its workers
/// running: once the owning pool is disposed, submissions through the
/// handle become silent no-ops.
#[derive(Clone)]
pub struct PoolExecutor {
    inner: Arc<PoolInner>,
}

impl Executor for PoolExecutor {
    fn execute(&self, task: Task) {
        self.inner.submit(task, SubmitPolicy::DispatchWhenFull);
    }

    fn dispatch(&self, task: Task) {
        if self.inner.is_done() {
            return;
        }
        if self.inner.is_pool_thread() {
            run_task(task);
        } else {
            self.execute(task);
        }
    }

    fn try_run_one(&self) -> bool {
        self.inner.try_run_one()
    }
}

impl std::fmt::Debug for PoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolExecutor")
            .field("pool", &self.inner.id())
            .finish()
    }
}
