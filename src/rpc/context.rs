//! Server-side context for one in-flight RPC call.

use super::agent::AgentInner;
use super::envelope;
use super::status::{Status, StatusCode};
use crate::executor::Executor;
use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Weak;
use std::time::Instant;

struct ContextState {
    finished: bool,
    cancelled: bool,
    completion: Option<Box<dyn FnOnce(Status) + Send>>,
}

/// Context for a single active call on the server side of an agent.
///
/// Constructed when an inbound request is decoded; the call is over once
/// [`CallContext::finish_call`] (or [`CallContext::cancel`]) has encoded
/// and submitted a response. Later finishes are no-ops, so the response
/// goes to the wire at most once however the handler, the deadline, and
/// cancellation race.
///
/// The context holds only a weak reference to its agent: a call that
/// outlives its connection quietly finishes into the void.
pub struct CallContext<E: Executor> {
    agent: Weak<AgentInner<E>>,
    request_id: u64,
    call_id: u32,
    deadline: Option<Instant>,
    state: Mutex<ContextState>,
}

impl<E: Executor> CallContext<E> {
    pub(crate) fn new(
        agent: Weak<AgentInner<E>>,
        request_id: u64,
        call_id: u32,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            agent,
            request_id,
            call_id,
            deadline,
            state: Mutex::new(ContextState {
                finished: false,
                cancelled: false,
                completion: None,
            }),
        }
    }

    /// The request id; useful for idempotency bookkeeping.
    #[must_use]
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Which handler serves this call.
    #[must_use]
    pub fn call_id(&self) -> u32 {
        self.call_id
    }

    /// The absolute deadline, or `None` when the caller did not set one.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `true` iff [`CallContext::cancel`] was invoked.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }

    /// `true` iff a response has been produced.
    #[must_use]
    pub fn has_finished(&self) -> bool {
        self.state.lock().finished
    }

    /// Installs a hook that runs locally after the response is submitted.
    pub fn set_completion<F>(&self, completion: F)
    where
        F: FnOnce(Status) + Send + 'static,
    {
        self.state.lock().completion = Some(Box::new(completion));
    }

    /// Sends a response with no payload.
    pub fn finish_call(&self, status: Status) {
        self.finish_impl(status, None::<fn(&mut BytesMut) -> bool>);
    }

    /// Sends a response, appending a serialized payload on success.
    ///
    /// The serializer returns `false` to report failure, which converts
    /// the response to [`StatusCode::DataLoss`].
    pub fn finish_call_with<S>(&self, status: Status, serializer: S)
    where
        S: FnOnce(&mut BytesMut) -> bool,
    {
        self.finish_impl(status, Some(serializer));
    }

    /// Attempts to cancel the call: marks the context and finishes with
    /// [`StatusCode::Cancelled`]. Loses quietly when racing an earlier
    /// finish.
    pub fn cancel(&self) {
        {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.cancelled = true;
        }
        self.finish_call(Status::new(StatusCode::Cancelled));
    }

    fn finish_impl<S>(&self, status: Status, serializer: Option<S>)
    where
        S: FnOnce(&mut BytesMut) -> bool,
    {
        let completion = {
            let mut state = self.state.lock();
            if state.finished {
                return;
            }
            state.finished = true;
            state.completion.take()
        };

        let Some(agent) = self.agent.upgrade() else {
            return; // connection is gone; nowhere to respond
        };

        let mut status = status;
        if status.ok() && self.deadline.is_some_and(|deadline| Instant::now() > deadline) {
            status = Status::new(StatusCode::DeadlineExceeded);
        }

        let encoded: Result<BytesMut, Status> = {
            let mut buffer = BytesMut::with_capacity(512);
            if envelope::encode_response_header(&mut buffer, self.request_id, &status).is_err() {
                Err(Status::new(StatusCode::DataLoss))
            } else if status.ok() {
                let serialized = match serializer {
                    Some(serialize) => serialize(&mut buffer),
                    None => true,
                };
                if serialized {
                    Ok(buffer)
                } else {
                    Err(Status::new(StatusCode::DataLoss))
                }
            } else {
                Ok(buffer)
            }
        };

        let (buffer, final_status) = match encoded {
            Ok(buffer) => (buffer, status),
            Err(fallback) => {
                // Minimal error envelope; empty strings cannot overflow.
                let mut buffer = BytesMut::with_capacity(envelope::RESPONSE_HEADER_MIN_LEN);
                if envelope::encode_response_header(&mut buffer, self.request_id, &fallback)
                    .is_err()
                {
                    return;
                }
                (buffer, fallback)
            }
        };

        agent.send_frame(buffer.freeze());
        if let Some(completion) = completion {
            completion(final_status);
        }
    }
}

impl<E: Executor> fmt::Display for CallContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "CallContext(id={}, call-id={}, is-cancelled={}, has-finished={})",
            self.request_id, self.call_id, state.cancelled, state.finished
        )
    }
}

impl<E: Executor> fmt::Debug for CallContext<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
