//! Sharded task queue with blocking pop and eviction backpressure.
//!
//! Backing storage is `N` independent [`Segment`]s. Two monotonic atomic
//! hints spread pushes and pops across the segments; each operation probes
//! all segments starting at `hint % N`, so a contended or full segment
//! just means moving on to the next one.
//!
//! The queue is not FIFO across segments; tasks within one segment are
//! FIFO. Callers needing causal ordering must serialize above this layer.

use super::segment::{PushOutcome, Segment};
use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// How long a popper sleeps between probe rounds.
///
/// The pop-side predicate reads `size` without holding `sleep_mutex`, so a
/// push can increment `size` and notify between a popper's probe and its
/// wait. The short timeout bounds the damage of a missed notify instead of
/// forcing every push through the condvar mutex.
const POP_WAIT: Duration = Duration::from_micros(10);

pub(crate) struct SharedQueue {
    segments: Box<[Segment]>,
    push_hint: AtomicUsize,
    pop_hint: AtomicUsize,
    size: AtomicUsize,
    capacity: AtomicUsize,
    done: AtomicBool,
    sleep_mutex: Mutex<()>,
    available: Condvar,
}

impl SharedQueue {
    pub(crate) fn new(n_segments: usize, segment_capacity: usize) -> Self {
        let segments: Vec<Segment> = (0..n_segments)
            .map(|_| Segment::with_capacity(segment_capacity))
            .collect();
        Self {
            segments: segments.into_boxed_slice(),
            push_hint: AtomicUsize::new(0),
            pop_hint: AtomicUsize::new(0),
            size: AtomicUsize::new(0),
            capacity: AtomicUsize::new(n_segments * segment_capacity),
            done: AtomicBool::new(false),
            sleep_mutex: Mutex::new(()),
            available: Condvar::new(),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Marks the queue finished and wakes all sleepers. Monotonic: once
    /// done, [`SharedQueue::blocking_pop`] returns `None` after draining.
    pub(crate) fn signal_done(&self) {
        let _guard = self.sleep_mutex.lock();
        self.done.store(true, Ordering::Release);
        self.available.notify_all();
    }

    fn increment_size(&self) {
        let old = self.size.fetch_add(1, Ordering::AcqRel);
        if old == 0 {
            self.available.notify_all();
        }
    }

    /// Pushes without blocking and without growing storage.
    ///
    /// If every probed segment is full, the oldest task of one segment is
    /// evicted and executed synchronously on the calling thread. This is
    /// the backpressure valve for producers that are themselves pool
    /// workers: storage stays bounded and the producer pays with its own
    /// time instead of blocking.
    ///
    /// Returns `false` (dropping the task) iff the queue is done.
    pub(crate) fn non_blocking_push(&self, task: Task) -> bool {
        if self.is_done() {
            return false;
        }
        let n = self.segments.len();
        let mut task = task;
        let outcome = 'probe: loop {
            let offset = self.push_hint.fetch_add(1, Ordering::Relaxed);
            for i in 0..n {
                match self.segments[(offset + i) % n].try_swap_push(task) {
                    Ok(outcome) => break 'probe outcome,
                    Err(returned) => task = returned,
                }
            }
        };
        match outcome {
            PushOutcome::Pushed => self.increment_size(),
            PushOutcome::Exchanged(evicted) => evicted.run(),
        }
        true
    }

    /// Pushes, growing a segment's storage when full. Never drops (except
    /// when done), never blocks, never executes on the caller.
    pub(crate) fn push_with_possible_resize(&self, task: Task) -> bool {
        if self.is_done() {
            return false;
        }
        let n = self.segments.len();
        let mut task = task;
        'probe: loop {
            let offset = self.push_hint.fetch_add(1, Ordering::Relaxed);
            for i in 0..n {
                match self.segments[(offset + i) % n].try_push_growing(task) {
                    Ok(delta) => {
                        if delta > 0 {
                            self.capacity.fetch_add(delta, Ordering::AcqRel);
                        }
                        break 'probe;
                    }
                    Err(returned) => task = returned,
                }
            }
        }
        self.increment_size();
        true
    }

    /// One non-blocking probe round across all segments.
    pub(crate) fn try_pop(&self) -> Option<Task> {
        let n = self.segments.len();
        let offset = self.pop_hint.fetch_add(1, Ordering::Relaxed);
        for i in 0..n {
            if let Some(task) = self.segments[(offset + i) % n].try_pop() {
                self.size.fetch_sub(1, Ordering::AcqRel);
                return Some(task);
            }
        }
        None
    }

    /// Pops a task, sleeping while the queue is empty.
    ///
    /// Returns `None` iff `done` was signalled and the queue was observed
    /// empty while holding the condvar mutex; once `None` is returned no
    /// further tasks will ever appear.
    pub(crate) fn blocking_pop(&self) -> Option<Task> {
        if self.is_done() && self.size() == 0 {
            return None;
        }
        loop {
            if self.is_done() {
                // No notify can race us while we hold the lock.
                let _guard = self.sleep_mutex.lock();
                if self.size() == 0 {
                    return None;
                }
            }

            if let Some(task) = self.try_pop() {
                return Some(task);
            }

            let mut guard = self.sleep_mutex.lock();
            if self.size() == 0 && !self.is_done() {
                let _ = self.available.wait_for(&mut guard, POP_WAIT);
            }
        }
    }
}
