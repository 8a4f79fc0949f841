//! Execution and deadline-timer contracts.
//!
//! The rest of the crate is written against these traits so that the RPC
//! agent and the future framework can run over any execution context, not
//! just [`crate::pool::ThreadPool`].

use crate::task::Task;
use std::time::Duration;

/// Something that can run tasks.
///
/// Handles are cheap to clone; all clones schedule onto the same
/// underlying context.
pub trait Executor: Clone + Send + Sync + 'static {
    /// Schedules a task for execution.
    fn execute(&self, task: Task);

    /// Runs the task inline when the caller is already on an execution
    /// thread of this context, otherwise schedules it.
    fn dispatch(&self, task: Task) {
        self.execute(task);
    }

    /// Steals one queued task and runs it, if any is available.
    ///
    /// Used by cooperative wait primitives; contexts without a stealable
    /// queue report `false`.
    fn try_run_one(&self) -> bool {
        false
    }
}

/// A single-use timer armed against a monotonic deadline.
///
/// The wait callback receives `true` iff the timer was cancelled before
/// (or while) firing; a cancelled timer's callback must treat the wait as
/// abandoned.
pub trait DeadlineTimer: Send {
    /// Sets the expiry relative to now. Must be called before
    /// [`DeadlineTimer::async_wait`].
    fn expires_after(&mut self, delay: Duration);

    /// Arms the timer; `callback` runs at or after the expiry.
    fn async_wait(&mut self, callback: Box<dyn FnOnce(bool) + Send>);

    /// Cancels the wait. Idempotent.
    fn cancel(&mut self);
}

/// Produces fresh [`DeadlineTimer`]s for the RPC agent's per-call timeouts.
pub type TimerFactory = Box<dyn Fn() -> Box<dyn DeadlineTimer> + Send + Sync>;
