//! Factory glue binding executors, timers, and futures.

use super::{Future, PackagedTask};
use crate::executor::Executor;
use crate::timer::TimerManager;
use std::time::Duration;

/// Runs `f` on `executor`, returning a future for its result.
pub fn spawn<E, F, R>(executor: &E, f: F) -> Future<R>
where
    E: Executor,
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (task, future) = PackagedTask::with_future(f);
    executor.execute(task.into_task());
    future
}

/// Runs `f` no earlier than `delay` from now, returning a cancellable
/// future for its result.
pub fn spawn_later<E, F, R>(timers: &TimerManager<E>, delay: Duration, f: F) -> Future<R>
where
    E: Executor,
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    timers.post_later(delay, f)
}

/// Attaches `f` as a continuation of `future`, running on `executor`.
///
/// Equivalent to [`Future::then`].
pub fn when<E, F, R, U>(
    future: &Future<R>,
    executor: &E,
    f: F,
) -> Result<Future<U>, crate::error::FutureError>
where
    E: Executor,
    F: FnOnce(R) -> U + Send + 'static,
    R: Send + 'static,
    U: Send + 'static,
{
    future.then(executor, f)
}
