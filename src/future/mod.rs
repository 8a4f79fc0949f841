//! Cancellable promise/future pairs with executor-driven continuations.
//!
//! A [`Promise`] is the producing handle, a [`Future`] the consuming one;
//! [`PackagedTask`] wraps a callable whose result or panic settles the
//! state on invocation. The state machine is:
//!
//! ```text
//! Unset ──set_value / set_panic──▶ Set        (terminal)
//! Unset ──cancel────────────────▶ Cancelled  (terminal)
//! ```
//!
//! Continuations attached with [`Future::then`] are posted to an executor
//! when the upstream settles, and are guaranteed to run exactly once no
//! matter how registration races with completion. Cancellation propagates:
//! a cancelled upstream cancels the downstream without running its body.
//!
//! Panics play the role exceptions do elsewhere: a panic in a packaged
//! callable or continuation body is captured into the owning state and
//! resurfaces from [`Future::get`].

mod spawn;
mod state;

pub use self::spawn::{spawn, spawn_later, when};
pub use self::state::{FutureStatus, PanicPayload};

use self::state::{SharedState, CANCELLED, SET, UNSET};
use crate::error::FutureError;
use crate::executor::Executor;
use crate::task::Task;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The producing half of a promise/future pair.
///
/// Dropping an unsatisfied promise cancels the state, so a waiting
/// consumer observes [`FutureError::BrokenPromise`] instead of hanging.
pub struct Promise<R> {
    state: Option<Arc<SharedState<R>>>,
}

impl<R: Send + 'static> Promise<R> {
    /// Creates a promise with fresh shared state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Some(Arc::new(SharedState::new())),
        }
    }

    fn state(&self) -> Result<&Arc<SharedState<R>>, FutureError> {
        self.state.as_ref().ok_or(FutureError::NoState)
    }

    /// Returns the consuming future. Fails with `AlreadyRetrieved` on a
    /// second call.
    pub fn get_future(&self) -> Result<Future<R>, FutureError> {
        let state = self.state()?;
        state.mark_retrieved()?;
        Ok(Future {
            state: Some(Arc::clone(state)),
        })
    }

    /// Settles the state with a value, waking waiters and firing any
    /// installed continuation.
    ///
    /// Fails with `AlreadySet` on a second production attempt; settling a
    /// cancelled state is a silent no-op.
    pub fn set_value(&self, value: R) -> Result<(), FutureError> {
        self.state()?.set_value(value)
    }

    /// Settles the state with a captured panic payload, which will resume
    /// from the consumer's [`Future::get`].
    pub fn set_panic(&self, payload: PanicPayload) -> Result<(), FutureError> {
        self.state()?.set_panic(payload)
    }

    /// Cancels the state if still unset. Idempotent.
    pub fn cancel(&self) -> Result<(), FutureError> {
        self.state()?.cancel();
        Ok(())
    }
}

impl<R: Send + 'static> Default for Promise<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Drop for Promise<R> {
    fn drop(&mut self) {
        if let Some(state) = &self.state {
            if state.status() == UNSET {
                state.cancel();
            }
        }
    }
}

impl<R> std::fmt::Debug for Promise<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("valid", &self.state.is_some())
            .finish()
    }
}

/// The consuming half of a promise/future pair.
pub struct Future<R> {
    state: Option<Arc<SharedState<R>>>,
}

impl<R: Send + 'static> Future<R> {
    fn state(&self) -> Result<&Arc<SharedState<R>>, FutureError> {
        self.state.as_ref().ok_or(FutureError::NoState)
    }

    /// `true` iff this handle is still associated with shared state.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    /// `true` iff a value (or captured panic) is ready to retrieve.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.status() == SET)
    }

    /// `true` iff the state was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state
            .as_ref()
            .is_some_and(|state| state.status() == CANCELLED)
    }

    /// Blocks until the state is terminal.
    pub fn wait(&self) -> Result<(), FutureError> {
        self.state()?.wait();
        Ok(())
    }

    /// Blocks until the state is terminal or `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration) -> Result<FutureStatus, FutureError> {
        Ok(self.state()?.wait_for(timeout))
    }

    /// Blocks until the state is terminal or `deadline` passes.
    pub fn wait_until(&self, deadline: Instant) -> Result<FutureStatus, FutureError> {
        Ok(self.state()?.wait_until(deadline))
    }

    /// Waits for the result and releases the shared state.
    ///
    /// A cancelled state reports [`FutureError::BrokenPromise`]. A captured
    /// panic is resumed on the calling thread. A second call reports
    /// [`FutureError::NoState`].
    pub fn get(&mut self) -> Result<R, FutureError> {
        let state = self.state.take().ok_or(FutureError::NoState)?;
        state.wait();
        if state.status() == CANCELLED {
            return Err(FutureError::BrokenPromise);
        }
        state.take_result()
    }

    /// Cancels the state if still unset. Idempotent, and the handle stays
    /// usable: `get` after `cancel` reports `BrokenPromise`.
    pub fn cancel(&self) -> Result<(), FutureError> {
        self.state()?.cancel();
        Ok(())
    }

    /// Attaches a continuation that consumes this future's result to
    /// produce the downstream future's value.
    ///
    /// When the upstream settles, the continuation is posted to
    /// `executor`; it runs exactly once even if registration races with
    /// completion. An upstream cancellation cancels the downstream without
    /// running `f`; a panic in `f` becomes the downstream panic payload.
    pub fn then<E, F, U>(&self, executor: &E, f: F) -> Result<Future<U>, FutureError>
    where
        E: Executor,
        F: FnOnce(R) -> U + Send + 'static,
        U: Send + 'static,
    {
        let upstream = Arc::clone(self.state()?);
        let downstream: Arc<SharedState<U>> = Arc::new(SharedState::new());

        let body = {
            let upstream = Arc::clone(&upstream);
            let downstream = Arc::clone(&downstream);
            Task::new(move || run_continuation(&upstream, &downstream, f))
        };
        let executor = executor.clone();
        let continuation = Task::new(move || executor.execute(body));

        if let Some(immediate) = upstream.install_continuation(continuation) {
            immediate.run();
        }

        Ok(Future {
            state: Some(downstream),
        })
    }
}

impl<R> std::fmt::Debug for Future<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future")
            .field("valid", &self.state.is_some())
            .finish()
    }
}

/// Continuation body: moves the upstream result through `f` into the
/// downstream state. Runs on the continuation executor, never under a
/// state lock.
fn run_continuation<R, U, F>(
    upstream: &Arc<SharedState<R>>,
    downstream: &Arc<SharedState<U>>,
    f: F,
) where
    F: FnOnce(R) -> U + Send + 'static,
{
    if upstream.status() == CANCELLED {
        downstream.cancel();
        return;
    }
    match upstream.take_for_continuation() {
        // Upstream value already consumed elsewhere; nothing to feed `f`.
        None => downstream.cancel(),
        Some(Err(payload)) => {
            let _ = downstream.set_panic(payload);
        }
        Some(Ok(value)) => match catch_unwind(AssertUnwindSafe(move || f(value))) {
            Ok(result) => {
                let _ = downstream.set_value(result);
            }
            Err(payload) => {
                let _ = downstream.set_panic(payload);
            }
        },
    }
}

/// A callable whose result settles an associated future on invocation.
///
/// Invoking a cancelled task is a no-op, which is how timer-scheduled work
/// is descheduled: the expired entry still runs, but the packaged task
/// observes the cancelled state and does nothing.
pub struct PackagedTask<R> {
    f: Option<Box<dyn FnOnce() -> R + Send + 'static>>,
    state: Option<Arc<SharedState<R>>>,
}

impl<R: Send + 'static> PackagedTask<R> {
    /// Wraps a callable.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Self {
            f: Some(Box::new(f)),
            state: Some(Arc::new(SharedState::new())),
        }
    }

    /// Wraps a callable and retrieves its future in one step.
    pub fn with_future<F>(f: F) -> (Self, Future<R>)
    where
        F: FnOnce() -> R + Send + 'static,
    {
        let state = Arc::new(SharedState::new());
        let _ = state.mark_retrieved();
        let future = Future {
            state: Some(Arc::clone(&state)),
        };
        let task = Self {
            f: Some(Box::new(f)),
            state: Some(state),
        };
        (task, future)
    }

    /// `true` iff this handle is still associated with shared state.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    /// Returns the future for this task's result. Fails with
    /// `AlreadyRetrieved` on a second call.
    pub fn get_future(&self) -> Result<Future<R>, FutureError> {
        let state = self.state.as_ref().ok_or(FutureError::NoState)?;
        state.mark_retrieved()?;
        Ok(Future {
            state: Some(Arc::clone(state)),
        })
    }

    /// Cancels the associated state; a later invocation will be a no-op.
    pub fn cancel(&self) -> Result<(), FutureError> {
        let state = self.state.as_ref().ok_or(FutureError::NoState)?;
        state.cancel();
        Ok(())
    }

    /// Runs the callable, capturing its result or panic into the state.
    pub fn run(mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        let Some(f) = self.f.take() else {
            return;
        };
        if state.status() == CANCELLED {
            return;
        }
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                let _ = state.set_value(value);
            }
            Err(payload) => {
                let _ = state.set_panic(payload);
            }
        }
    }

    /// Boxes this task for submission to an executor.
    #[must_use]
    pub fn into_task(self) -> Task {
        Task::new(move || self.run())
    }
}

impl<R> Drop for PackagedTask<R> {
    fn drop(&mut self) {
        // A task dropped without running (pool already disposed, say)
        // breaks its promise rather than leaving waiters hanging.
        if let Some(state) = &self.state {
            if state.status() == UNSET {
                state.cancel();
            }
        }
    }
}

impl<R> std::fmt::Debug for PackagedTask<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackagedTask")
            .field("valid", &self.state.is_some())
            .finish()
    }
}
