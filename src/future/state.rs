//! Shared state between the producing and consuming halves of a future.
//!
//! The state is a single-producer, single-consumer record guarded by a
//! mutex that is held only around status transitions and continuation
//! installation; the continuation itself always runs after the lock is
//! released. Status is mirrored in an atomic so readers on the fast path
//! never touch the lock.

use crate::error::FutureError;
use crate::task::Task;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

pub(crate) const UNSET: u8 = 0;
pub(crate) const SET: u8 = 1;
pub(crate) const CANCELLED: u8 = 2;

/// Payload of a captured panic.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Discriminant returned by timed waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureStatus {
    /// The future reached a terminal state.
    Ready,
    /// The wait expired first.
    Timeout,
}

struct Inner<R> {
    value: Option<R>,
    panic: Option<PanicPayload>,
    continuation: Option<Task>,
    retrieved: bool,
}

pub(crate) struct SharedState<R> {
    status: AtomicU8,
    inner: Mutex<Inner<R>>,
    ready: Condvar,
}

impl<R> SharedState<R> {
    pub(crate) fn new() -> Self {
        Self {
            status: AtomicU8::new(UNSET),
            inner: Mutex::new(Inner {
                value: None,
                panic: None,
                continuation: None,
                retrieved: false,
            }),
            ready: Condvar::new(),
        }
    }

    pub(crate) fn status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    /// Flags that the consuming future has been handed out.
    pub(crate) fn mark_retrieved(&self) -> Result<(), FutureError> {
        let mut inner = self.inner.lock();
        if inner.retrieved {
            return Err(FutureError::AlreadyRetrieved);
        }
        inner.retrieved = true;
        Ok(())
    }

    /// Transitions `Unset -> Set` with a value.
    ///
    /// A second production attempt reports `AlreadySet`; producing into a
    /// cancelled state is a silent no-op.
    pub(crate) fn set_value(&self, value: R) -> Result<(), FutureError> {
        let continuation = {
            let mut inner = self.inner.lock();
            match self.status.load(Ordering::Acquire) {
                SET => return Err(FutureError::AlreadySet),
                CANCELLED => return Ok(()),
                _ => {}
            }
            inner.value = Some(value);
            self.status.store(SET, Ordering::Release);
            self.ready.notify_all();
            inner.continuation.take()
        };
        if let Some(continuation) = continuation {
            continuation.run();
        }
        Ok(())
    }

    /// Transitions `Unset -> Set` with a captured panic payload.
    pub(crate) fn set_panic(&self, payload: PanicPayload) -> Result<(), FutureError> {
        let continuation = {
            let mut inner = self.inner.lock();
            match self.status.load(Ordering::Acquire) {
                SET => return Err(FutureError::AlreadySet),
                CANCELLED => return Ok(()),
                _ => {}
            }
            inner.panic = Some(payload);
            self.status.store(SET, Ordering::Release);
            self.ready.notify_all();
            inner.continuation.take()
        };
        if let Some(continuation) = continuation {
            continuation.run();
        }
        Ok(())
    }

    /// Transitions `Unset -> Cancelled`. Idempotent; a no-op once the
    /// state is terminal.
    pub(crate) fn cancel(&self) {
        let continuation = {
            let mut inner = self.inner.lock();
            if self.status.load(Ordering::Acquire) != UNSET {
                return;
            }
            self.status.store(CANCELLED, Ordering::Release);
            self.ready.notify_all();
            inner.continuation.take()
        };
        if let Some(continuation) = continuation {
            continuation.run();
        }
    }

    /// Installs the continuation, or returns it when the state is already
    /// terminal so the caller fires it immediately. Exactly one of the two
    /// happens, which is what guarantees exactly-once execution.
    pub(crate) fn install_continuation(&self, continuation: Task) -> Option<Task> {
        let mut inner = self.inner.lock();
        if self.status.load(Ordering::Acquire) != UNSET {
            return Some(continuation);
        }
        debug_assert!(inner.continuation.is_none(), "continuation already installed");
        inner.continuation = Some(continuation);
        None
    }

    pub(crate) fn wait(&self) {
        if self.status() != UNSET {
            return;
        }
        let mut inner = self.inner.lock();
        while self.status.load(Ordering::Acquire) == UNSET {
            self.ready.wait(&mut inner);
        }
    }

    pub(crate) fn wait_until(&self, deadline: Instant) -> FutureStatus {
        if self.status() != UNSET {
            return FutureStatus::Ready;
        }
        let mut inner = self.inner.lock();
        while self.status.load(Ordering::Acquire) == UNSET {
            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                return if self.status.load(Ordering::Acquire) == UNSET {
                    FutureStatus::Timeout
                } else {
                    FutureStatus::Ready
                };
            }
        }
        FutureStatus::Ready
    }

    pub(crate) fn wait_for(&self, timeout: Duration) -> FutureStatus {
        self.wait_until(Instant::now() + timeout)
    }

    /// Takes the settled result. The state must be `Set`.
    ///
    /// `Err(NoState)` means the value was already consumed (by a
    /// continuation or an earlier `get`).
    pub(crate) fn take_result(&self) -> Result<R, FutureError> {
        debug_assert_eq!(self.status(), SET);
        let mut inner = self.inner.lock();
        if let Some(payload) = inner.panic.take() {
            drop(inner);
            std::panic::resume_unwind(payload);
        }
        inner.value.take().ok_or(FutureError::NoState)
    }

    /// Takes the settled result for a continuation body, without
    /// resuming a captured panic. `None` means already consumed.
    pub(crate) fn take_for_continuation(&self) -> Option<Result<R, PanicPayload>> {
        debug_assert_eq!(self.status(), SET);
        let mut inner = self.inner.lock();
        if let Some(payload) = inner.panic.take() {
            return Some(Err(payload));
        }
        inner.value.take().map(Ok)
    }
}
