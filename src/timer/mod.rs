//! Deadline-ordered timer manager.
//!
//! Delayed tasks live in sharded min-heaps keyed by absolute monotonic
//! deadline. A single scheduler thread owns the ordering: it drains every
//! shard's expired entries onto the configured executor, publishes the
//! earliest remaining deadline, and sleeps on a condvar until that instant
//! or until a submitter installs an earlier one.
//!
//! Timing contract: a task never runs before its deadline; there is no
//! upper bound on how late it runs. Cancellation goes through the future
//! returned by [`TimerManager::post_later`] — the expired entry still runs,
//! but the packaged task observes the cancelled state and is a no-op.

mod shard;

use self::shard::{TimerEntry, TimerShard};
use crate::config::TimerConfig;
use crate::executor::{DeadlineTimer, Executor, TimerFactory};
use crate::future::{Future, PackagedTask};
use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

/// Published "no pending deadline" marker.
const NO_DEADLINE: u64 = u64::MAX;

struct TimerInner<E: Executor> {
    shards: Box<[TimerShard]>,
    push_hint: AtomicUsize,
    seq: AtomicU64,
    done: AtomicBool,
    /// Creation instant; deadlines are published as nanoseconds since it.
    epoch: Instant,
    /// Earliest pending deadline in nanos since `epoch`, or [`NO_DEADLINE`].
    next_when: AtomicU64,
    sleep_mutex: Mutex<()>,
    wake: Condvar,
    executor: E,
}

impl<E: Executor> TimerInner<E> {
    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn nanos_since_epoch(&self, when: Instant) -> u64 {
        u64::try_from(when.saturating_duration_since(self.epoch).as_nanos())
            .unwrap_or(NO_DEADLINE - 1)
    }

    /// Lowers the published deadline and wakes the scheduler when `when`
    /// is earlier than what it is currently sleeping toward.
    fn update_next_when(&self, when: Instant) {
        let nanos = self.nanos_since_epoch(when);
        if nanos < self.next_when.load(Ordering::Acquire) {
            let _guard = self.sleep_mutex.lock();
            if nanos < self.next_when.load(Ordering::Acquire) {
                self.next_when.store(nanos, Ordering::Release);
                self.wake.notify_all();
            }
        }
    }

    fn post(&self, delay: Duration, task: Task) -> bool {
        if self.is_done() {
            return false;
        }
        let when = Instant::now() + delay;
        let mut entry = TimerEntry {
            when,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            task,
        };
        let n = self.shards.len();
        'probe: loop {
            let offset = self.push_hint.fetch_add(1, Ordering::Relaxed);
            for i in 0..n {
                match self.shards[(offset + i) % n].try_insert(entry) {
                    Ok(()) => break 'probe,
                    Err(returned) => entry = returned,
                }
            }
        }
        self.update_next_when(when);
        true
    }

    /// One scheduler round: drain expired entries, submit them, and report
    /// the earliest remaining deadline.
    fn drain_round(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut expired: SmallVec<[Task; 8]> = SmallVec::new();
        let mut next: Option<Instant> = None;
        for shard in self.shards.iter() {
            let remaining = shard.drain_expired(now, &mut expired);
            next = match (next, remaining) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        for task in expired {
            self.executor.execute(task);
        }
        next
    }

    fn scheduler_loop(&self) {
        tracing::debug!("timer scheduler started");
        while !self.is_done() {
            self.next_when.store(NO_DEADLINE, Ordering::Release);
            if let Some(next) = self.drain_round() {
                self.update_next_when(next);
            }
            self.sleep_until_next();
        }
        tracing::debug!("timer scheduler stopped");
    }

    fn deadline_reached(&self) -> bool {
        let target = self.next_when.load(Ordering::Acquire);
        target != NO_DEADLINE && self.nanos_since_epoch(Instant::now()) >= target
    }

    fn sleep_until_next(&self) {
        if self.is_done() || self.deadline_reached() {
            return;
        }
        let mut guard = self.sleep_mutex.lock();
        loop {
            if self.is_done() || self.deadline_reached() {
                return;
            }
            let target = self.next_when.load(Ordering::Acquire);
            if target == NO_DEADLINE {
                self.wake.wait(&mut guard);
            } else {
                let deadline = self.epoch + Duration::from_nanos(target);
                if self.wake.wait_until(&mut guard, deadline).timed_out() {
                    return;
                }
            }
        }
    }
}

/// Schedules tasks for execution at a future instant.
///
/// Owns a background scheduler thread. Dispose the manager before the
/// executor's backing resources go away, so expirations have somewhere to
/// land.
pub struct TimerManager<E: Executor> {
    inner: Arc<TimerInner<E>>,
    scheduler: Mutex<Option<thread::JoinHandle<()>>>,
}

impl<E: Executor> TimerManager<E> {
    /// Creates a manager with default tuning (8 shards).
    #[must_use]
    pub fn new(executor: E) -> Self {
        Self::with_config(executor, &TimerConfig::default())
    }

    /// Creates a manager with explicit tuning.
    #[must_use]
    pub fn with_config(executor: E, config: &TimerConfig) -> Self {
        let n_shards = config.n_shards.max(1);
        let shards: Vec<TimerShard> = (0..n_shards)
            .map(|_| TimerShard::with_capacity(config.shard_capacity))
            .collect();
        let inner = Arc::new(TimerInner {
            shards: shards.into_boxed_slice(),
            push_hint: AtomicUsize::new(0),
            seq: AtomicU64::new(0),
            done: AtomicBool::new(false),
            epoch: Instant::now(),
            next_when: AtomicU64::new(NO_DEADLINE),
            sleep_mutex: Mutex::new(()),
            wake: Condvar::new(),
            executor,
        });
        let scheduler = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("weft-timer".to_string())
                .spawn(move || inner.scheduler_loop())
                .expect("failed to spawn timer scheduler thread")
        };
        Self {
            inner,
            scheduler: Mutex::new(Some(scheduler)),
        }
    }

    /// The executor expirations are submitted to.
    #[must_use]
    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    /// Schedules `task` to run no earlier than `delay` from now.
    ///
    /// Returns `false` iff the manager has been disposed.
    pub fn post(&self, delay: Duration, task: Task) -> bool {
        self.inner.post(delay, task)
    }

    /// Schedules `f` to run no earlier than `delay` from now, returning a
    /// cancellable future for its result.
    ///
    /// Cancelling the future before expiry prevents the body from running;
    /// the future then reports [`crate::error::FutureError::BrokenPromise`]
    /// on `get`.
    pub fn post_later<F, R>(&self, delay: Duration, f: F) -> Future<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, future) = PackagedTask::with_future(f);
        self.inner.post(delay, task.into_task());
        future
    }

    /// Returns a factory producing [`DeadlineTimer`]s backed by this
    /// manager, for use by the RPC agent.
    #[must_use]
    pub fn timer_factory(&self) -> TimerFactory {
        let inner = Arc::downgrade(&self.inner);
        Box::new(move || {
            Box::new(ManagedTimer {
                inner: Weak::clone(&inner),
                delay: Duration::ZERO,
                cancelled: Arc::new(AtomicBool::new(false)),
            })
        })
    }

    /// Stops the scheduler thread and rejects further posts. Pending
    /// entries are dropped. Idempotent.
    pub fn dispose(&self) {
        {
            let _guard = self.inner.sleep_mutex.lock();
            if self.inner.done.swap(true, Ordering::AcqRel) {
                return;
            }
            self.inner.wake.notify_all();
        }
        if let Some(handle) = self.scheduler.lock().take() {
            if handle.join().is_err() {
                tracing::error!("timer scheduler terminated by panic");
            }
        }
    }
}

impl<E: Executor> Drop for TimerManager<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A [`DeadlineTimer`] that posts its wait callback through a
/// [`TimerManager`].
struct ManagedTimer<E: Executor> {
    inner: Weak<TimerInner<E>>,
    delay: Duration,
    cancelled: Arc<AtomicBool>,
}

impl<E: Executor> DeadlineTimer for ManagedTimer<E> {
    fn expires_after(&mut self, delay: Duration) {
        self.delay = delay;
    }

    fn async_wait(&mut self, callback: Box<dyn FnOnce(bool) + Send>) {
        let cancelled = Arc::clone(&self.cancelled);
        if let Some(inner) = self.inner.upgrade() {
            inner.post(
                self.delay,
                Task::new(move || callback(cancelled.load(Ordering::Acquire))),
            );
        }
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
    }
}
