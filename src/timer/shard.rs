//! One deadline-ordered heap shard.

use crate::task::Task;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Instant;

/// A pending timer: the task and its absolute deadline.
///
/// `seq` breaks same-deadline ties by submission order, making expiry
/// deterministic.
pub(crate) struct TimerEntry {
    pub(crate) when: Instant,
    pub(crate) seq: u64,
    pub(crate) task: Task,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for a min-heap (earliest deadline first).
        other
            .when
            .cmp(&self.when)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timer entries behind an optimistically-acquired mutex.
pub(crate) struct TimerShard {
    heap: Mutex<BinaryHeap<TimerEntry>>,
}

impl TimerShard {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity)),
        }
    }

    /// Inserts unless the shard lock is contended; `Err` hands the entry
    /// back so the caller can probe the next shard.
    pub(crate) fn try_insert(&self, entry: TimerEntry) -> Result<(), TimerEntry> {
        let Some(mut heap) = self.heap.try_lock() else {
            return Err(entry);
        };
        heap.push(entry);
        Ok(())
    }

    /// Moves every entry with `when <= now` into `out` and returns the
    /// earliest remaining deadline, if any.
    ///
    /// Tasks are collected under the lock and executed by the caller after
    /// release, so no external code runs while the shard is held.
    pub(crate) fn drain_expired(
        &self,
        now: Instant,
        out: &mut SmallVec<[Task; 8]>,
    ) -> Option<Instant> {
        let mut heap = self.heap.lock();
        while heap.peek().is_some_and(|entry| entry.when <= now) {
            if let Some(entry) = heap.pop() {
                out.push(entry.task);
            }
        }
        heap.peek().map(|entry| entry.when)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.lock().len()
    }
}
