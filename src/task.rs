//! The type-erased unit of work moved through the runtime.

use std::fmt;

/// A moveable, run-once unit of work.
///
/// Every scheduling primitive in the crate traffics in `Task`: the pool
/// queues them, the timer manager holds them until their deadline, and
/// future continuations are boxed into them before being re-posted.
///
/// Return values and panics never cross a `Task` boundary directly; they
/// are captured inside future shared state before the callable is boxed
/// (see [`crate::future::PackagedTask`]). A panic that escapes a raw task
/// on a pool worker is fatal.
pub struct Task {
    f: Box<dyn FnOnce() + Send + 'static>,
}

impl Task {
    /// Boxes a callable into a task.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { f: Box::new(f) }
    }

    /// Consumes the task and runs it.
    pub fn run(self) {
        (self.f)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task")
    }
}
