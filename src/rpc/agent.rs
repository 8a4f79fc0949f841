//! Bidirectional RPC multiplexer over one framed duplex stream.
//!
//! An agent is simultaneously server and client on the same connection.
//! Inbound frames are split by their tag byte: requests are decoded into a
//! [`CallContext`] and dispatched to the installed handler through the
//! executor; responses are matched against the outstanding-call map and
//! complete the originating call.
//!
//! Completion is at-most-once per request id. The wire response, the
//! deadline timer, local cancellation, and stream close all funnel through
//! the same map removal, so whichever wins the race invokes the completion
//! and the rest find the entry gone.
//!
//! Frame-level corruption is non-fatal: the offending frame is logged and
//! dropped, and no other call on the connection is affected. Stream-level
//! failure closes the agent and resolves every outstanding completion with
//! [`StatusCode::Unavailable`].

use super::context::CallContext;
use super::envelope::{self, decode_request, decode_response};
use super::status::{Status, StatusCode};
use crate::config::AgentConfig;
use crate::executor::{DeadlineTimer, Executor, TimerFactory};
use crate::net::{MessageStream, StreamError, StreamHandler, StreamOp};
use crate::task::Task;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Serves one inbound request: receives the call context and the request
/// payload, returns the task that performs the call.
///
/// The payload bytes are only borrowed conceptually — the handler must
/// deserialize or retain what it needs before returning the task.
pub type CallHandler<E> = Box<dyn Fn(Arc<CallContext<E>>, Bytes) -> Task + Send + Sync>;

/// Client-side completion: receives the response status and payload.
pub type RpcCompletion = Box<dyn FnOnce(Status, Bytes) + Send>;

/// Close code sent when a write error forces the connection down.
const CLOSE_INTERNAL_ERROR: u16 = 1011;

struct OutstandingCall {
    completion: RpcCompletion,
    timeout: Option<Box<dyn DeadlineTimer>>,
}

pub(crate) struct AgentInner<E: Executor> {
    executor: E,
    handler: Option<CallHandler<E>>,
    timer_factory: TimerFactory,
    stream: Box<dyn MessageStream>,
    next_request_id: AtomicU64,
    outstanding: Mutex<HashMap<u64, OutstandingCall>>,
    closed: AtomicBool,
    config: AgentConfig,
}

impl<E: Executor> AgentInner<E> {
    pub(crate) fn send_frame(&self, frame: Bytes) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        self.stream.send(frame);
    }

    /// Completes the outstanding call for `request_id`, if it is still
    /// outstanding. Absent entries (late or duplicate responses) are
    /// dropped silently.
    fn finish_response(&self, request_id: u64, status: Status, payload: Bytes) {
        let entry = self.outstanding.lock().remove(&request_id);
        let Some(mut entry) = entry else {
            tracing::debug!(request_id, "dropping response with no outstanding call");
            return;
        };
        if let Some(timer) = entry.timeout.as_mut() {
            timer.cancel();
        }
        (entry.completion)(status, payload);
    }

    /// Resolves every outstanding call with `code`. Used on stream close.
    fn drain_outstanding(&self, code: StatusCode) {
        let entries: Vec<(u64, OutstandingCall)> = {
            let mut outstanding = self.outstanding.lock();
            outstanding.drain().collect()
        };
        for (request_id, mut entry) in entries {
            if let Some(timer) = entry.timeout.as_mut() {
                timer.cancel();
            }
            tracing::debug!(request_id, code = %code, "resolving outstanding call");
            (entry.completion)(Status::new(code), Bytes::new());
        }
    }

    fn handle_request(this: &Arc<Self>, frame: Bytes) {
        let envelope = match decode_request(&frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::debug!(%error, "dropping malformed request frame");
                return;
            }
        };
        let deadline = if envelope.deadline_millis == 0 {
            None
        } else {
            Some(Instant::now() + Duration::from_millis(u64::from(envelope.deadline_millis)))
        };
        let context = Arc::new(CallContext::new(
            Arc::downgrade(this),
            envelope.request_id,
            envelope.call_id,
            deadline,
        ));
        match &this.handler {
            None => context.finish_call(Status::new(StatusCode::Unimplemented)),
            Some(handler) => {
                let task = handler(context, envelope.payload);
                this.executor.dispatch(task);
            }
        }
    }

    fn handle_response(&self, frame: Bytes) {
        let envelope = match decode_response(&frame) {
            Ok(envelope) => envelope,
            Err(error) => {
                tracing::debug!(%error, "dropping malformed response frame");
                return;
            }
        };
        self.finish_response(envelope.request_id, envelope.status, envelope.payload);
    }

    fn close(&self, reason: &str) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(reason, "agent closed");
        self.drain_outstanding(StatusCode::Unavailable);
    }
}

/// A bidirectional RPC endpoint bound to one framed duplex stream.
///
/// Implement the carrier against [`StreamHandler`] and hand the agent the
/// stream's outbound half; the agent does the rest.
pub struct RpcAgent<E: Executor> {
    inner: Arc<AgentInner<E>>,
}

impl<E: Executor> RpcAgent<E> {
    /// Creates an agent with no call handler; inbound requests finish
    /// immediately with [`StatusCode::Unimplemented`].
    #[must_use]
    pub fn new(
        executor: E,
        stream: Box<dyn MessageStream>,
        timer_factory: TimerFactory,
        config: AgentConfig,
    ) -> Self {
        Self::build(executor, stream, timer_factory, None, config)
    }

    /// Creates an agent that serves inbound requests with `handler`.
    #[must_use]
    pub fn with_handler(
        executor: E,
        stream: Box<dyn MessageStream>,
        timer_factory: TimerFactory,
        handler: CallHandler<E>,
        config: AgentConfig,
    ) -> Self {
        Self::build(executor, stream, timer_factory, Some(handler), config)
    }

    fn build(
        executor: E,
        stream: Box<dyn MessageStream>,
        timer_factory: TimerFactory,
        handler: Option<CallHandler<E>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            inner: Arc::new(AgentInner {
                executor,
                handler,
                timer_factory,
                stream,
                next_request_id: AtomicU64::new(1),
                outstanding: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
                config,
            }),
        }
    }

    /// The executor inbound requests are dispatched onto.
    #[must_use]
    pub fn executor(&self) -> &E {
        &self.inner.executor
    }

    /// `true` once the stream has failed or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Sends a type-erased call and registers its completion.
    ///
    /// `serializer` appends the call parameters to the wire buffer and
    /// returns `false` on failure, in which case the completion runs
    /// locally with [`StatusCode::Aborted`] and nothing is sent. A
    /// `deadline_millis` of zero falls back to the configured default;
    /// if that is also zero the call waits indefinitely.
    ///
    /// Returns the request id, usable with [`RpcAgent::cancel_call`].
    pub fn perform_rpc_call<S>(
        &self,
        call_id: u32,
        deadline_millis: u32,
        serializer: Option<S>,
        completion: RpcCompletion,
    ) -> u64
    where
        S: FnOnce(&mut BytesMut) -> bool,
    {
        let inner = &self.inner;
        let request_id = inner.next_request_id.fetch_add(1, Ordering::AcqRel);

        if inner.closed.load(Ordering::Acquire) {
            completion(Status::new(StatusCode::Unavailable), Bytes::new());
            return request_id;
        }

        let deadline_millis = if deadline_millis == 0 {
            inner.config.default_deadline_millis
        } else {
            deadline_millis
        };

        let mut buffer = BytesMut::with_capacity(envelope::REQUEST_HEADER_LEN + 128);
        envelope::encode_request_header(&mut buffer, request_id, call_id, deadline_millis);
        if let Some(serialize) = serializer {
            if !serialize(&mut buffer) {
                completion(Status::new(StatusCode::Aborted), Bytes::new());
                return request_id;
            }
        }

        let timeout = if deadline_millis > 0 {
            let mut timer = (inner.timer_factory)();
            timer.expires_after(Duration::from_millis(u64::from(deadline_millis)));
            let weak: Weak<AgentInner<E>> = Arc::downgrade(inner);
            timer.async_wait(Box::new(move |cancelled| {
                if cancelled {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    inner.finish_response(
                        request_id,
                        Status::new(StatusCode::DeadlineExceeded),
                        Bytes::new(),
                    );
                }
            }));
            Some(timer)
        } else {
            None
        };

        inner.outstanding.lock().insert(
            request_id,
            OutstandingCall {
                completion,
                timeout,
            },
        );

        inner.send_frame(buffer.freeze());
        request_id
    }

    /// Cancels an outstanding call: the completion runs with
    /// [`StatusCode::Cancelled`] and a later wire response is dropped.
    /// A no-op if the call already completed.
    pub fn cancel_call(&self, request_id: u64) {
        self.inner
            .finish_response(request_id, Status::new(StatusCode::Cancelled), Bytes::new());
    }

    /// Initiates orderly shutdown: closes the stream and resolves every
    /// outstanding completion with [`StatusCode::Unavailable`].
    pub fn close(&self, code: u16, reason: &str) {
        self.inner.stream.close(code, reason);
        self.inner.close(reason);
    }
}

impl<E: Executor> StreamHandler for RpcAgent<E> {
    fn on_connect(&self) {
        tracing::debug!("agent stream connected");
    }

    fn on_message(&self, frame: Bytes) {
        if frame.is_empty() {
            tracing::debug!("dropping empty frame");
            return;
        }
        // The tag byte disambiguates without any other state.
        if frame[0] == 0 {
            self.inner.handle_response(frame);
        } else {
            AgentInner::handle_request(&self.inner, frame);
        }
    }

    fn on_close(&self, code: u16, reason: &str) {
        tracing::debug!(code, reason, "agent stream closed");
        self.inner.close(reason);
    }

    fn on_error(&self, op: StreamOp, error: StreamError) {
        tracing::warn!(?op, %error, "agent stream error");
        if op == StreamOp::Write {
            // A failed write means responses can no longer be delivered;
            // tear the connection down.
            self.inner.stream.close(CLOSE_INTERNAL_ERROR, "write error");
            self.inner.close("write error");
        }
    }
}

impl<E: Executor> std::fmt::Debug for RpcAgent<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcAgent")
            .field("closed", &self.is_closed())
            .field("outstanding", &self.inner.outstanding.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[derive(Debug, Clone, Default)]
    struct InlineExecutor;

    impl Executor for InlineExecutor {
        fn execute(&self, task: Task) {
            task.run();
        }
    }

    /// Captures outbound frames for inspection.
    #[derive(Default)]
    struct CapturingStream {
        frames: Mutex<Vec<Bytes>>,
        closes: Mutex<Vec<(u16, String)>>,
    }

    impl MessageStream for Arc<CapturingStream> {
        fn send(&self, frame: Bytes) {
            self.frames.lock().push(frame);
        }

        fn close(&self, code: u16, reason: &str) {
            self.closes.lock().push((code, reason.to_string()));
        }
    }

    /// A timer the test fires by hand.
    #[derive(Default)]
    struct ManualTimerState {
        callback: Mutex<Option<Box<dyn FnOnce(bool) + Send>>>,
        cancelled: AtomicBool,
    }

    impl ManualTimerState {
        fn fire(&self) {
            if let Some(callback) = self.callback.lock().take() {
                callback(self.cancelled.load(Ordering::Acquire));
            }
        }
    }

    struct ManualTimer {
        state: Arc<ManualTimerState>,
    }

    impl DeadlineTimer for ManualTimer {
        fn expires_after(&mut self, _delay: Duration) {}

        fn async_wait(&mut self, callback: Box<dyn FnOnce(bool) + Send>) {
            *self.state.callback.lock() = Some(callback);
        }

        fn cancel(&mut self) {
            self.state.cancelled.store(true, Ordering::Release);
        }
    }

    fn manual_timer_factory() -> (TimerFactory, Arc<Mutex<Vec<Arc<ManualTimerState>>>>) {
        let created: Arc<Mutex<Vec<Arc<ManualTimerState>>>> = Arc::default();
        let registry = Arc::clone(&created);
        let factory: TimerFactory = Box::new(move || {
            let state = Arc::new(ManualTimerState::default());
            registry.lock().push(Arc::clone(&state));
            Box::new(ManualTimer { state })
        });
        (factory, created)
    }

    fn test_agent(
        handler: Option<CallHandler<InlineExecutor>>,
    ) -> (
        RpcAgent<InlineExecutor>,
        Arc<CapturingStream>,
        Arc<Mutex<Vec<Arc<ManualTimerState>>>>,
    ) {
        let stream = Arc::new(CapturingStream::default());
        let (factory, timers) = manual_timer_factory();
        let agent = match handler {
            Some(handler) => RpcAgent::with_handler(
                InlineExecutor,
                Box::new(Arc::clone(&stream)),
                factory,
                handler,
                AgentConfig::default(),
            ),
            None => RpcAgent::new(
                InlineExecutor,
                Box::new(Arc::clone(&stream)),
                factory,
                AgentConfig::default(),
            ),
        };
        (agent, stream, timers)
    }

    fn request_frame(request_id: u64, call_id: u32, deadline_millis: u32, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::new();
        envelope::encode_request_header(&mut buf, request_id, call_id, deadline_millis);
        buf.extend_from_slice(payload);
        buf.freeze()
    }

    #[test]
    fn unknown_call_finishes_unimplemented() {
        init_test("unknown_call_finishes_unimplemented");
        let (agent, stream, _) = test_agent(None);
        agent.on_message(request_frame(9, 999, 0, b""));

        let frames = stream.frames.lock();
        crate::assert_with_log!(frames.len() == 1, "one response sent", 1, frames.len());
        let envelope = decode_response(&frames[0]).unwrap();
        crate::assert_with_log!(envelope.request_id == 9, "request id", 9, envelope.request_id);
        let code = envelope.status.code();
        crate::assert_with_log!(
            code == StatusCode::Unimplemented,
            "unimplemented",
            StatusCode::Unimplemented,
            code
        );
        crate::test_complete!("unknown_call_finishes_unimplemented");
    }

    #[test]
    fn handler_payload_echo_round_trip() {
        init_test("handler_payload_echo_round_trip");
        let handler: CallHandler<InlineExecutor> = Box::new(|context, payload| {
            Task::new(move || {
                context.finish_call_with(Status::ok_status(), |buffer: &mut BytesMut| {
                    buffer.extend_from_slice(&payload);
                    true
                });
            })
        });
        let (agent, stream, _) = test_agent(Some(handler));
        agent.on_message(request_frame(4, 0, 1000, b"Hello World!"));

        let frames = stream.frames.lock();
        let envelope = decode_response(&frames[0]).unwrap();
        let ok = envelope.status.ok();
        crate::assert_with_log!(ok, "status ok", true, ok);
        let echoed = envelope.payload.as_ref() == b"Hello World!";
        crate::assert_with_log!(echoed, "payload echoed", true, echoed);
        crate::test_complete!("handler_payload_echo_round_trip");
    }

    #[test]
    fn empty_and_malformed_frames_are_dropped() {
        init_test("empty_and_malformed_frames_are_dropped");
        let (agent, stream, _) = test_agent(None);
        agent.on_message(Bytes::new());
        agent.on_message(Bytes::from_static(&[1, 2, 3])); // truncated request
        agent.on_message(Bytes::from_static(&[0, 9])); // truncated response

        let sent = stream.frames.lock().len();
        crate::assert_with_log!(sent == 0, "nothing sent", 0, sent);
        let outstanding = agent.inner.outstanding.lock().len();
        crate::assert_with_log!(outstanding == 0, "map untouched", 0, outstanding);
        crate::test_complete!("empty_and_malformed_frames_are_dropped");
    }

    #[test]
    fn response_completes_call_exactly_once() {
        init_test("response_completes_call_exactly_once");
        let (agent, stream, _) = test_agent(None);
        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        let request_id = agent.perform_rpc_call(
            7,
            0,
            Some(|buffer: &mut BytesMut| {
                buffer.extend_from_slice(b"params");
                true
            }),
            Box::new(move |status, payload| {
                assert!(status.ok());
                assert_eq!(payload.as_ref(), b"result");
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        // The request went to the wire.
        {
            let frames = stream.frames.lock();
            let sent = decode_request(&frames[0]).unwrap();
            crate::assert_with_log!(
                sent.request_id == request_id,
                "request id on wire",
                request_id,
                sent.request_id
            );
            let params = sent.payload.as_ref() == b"params";
            crate::assert_with_log!(params, "params serialized", true, params);
        }

        // Deliver the response twice; only the first completes.
        let mut buf = BytesMut::new();
        envelope::encode_response_header(&mut buf, request_id, &Status::ok_status()).unwrap();
        buf.extend_from_slice(b"result");
        let response = buf.freeze();
        agent.on_message(response.clone());
        agent.on_message(response);

        let count = completions.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "exactly one completion", 1, count);
        crate::test_complete!("response_completes_call_exactly_once");
    }

    #[test]
    fn serializer_failure_aborts_locally() {
        init_test("serializer_failure_aborts_locally");
        let (agent, stream, _) = test_agent(None);
        let completions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&completions);
        agent.perform_rpc_call(
            1,
            0,
            Some(|_buffer: &mut BytesMut| false),
            Box::new(move |status, _payload| {
                seen.lock().push(status.code());
            }),
        );
        let sent = stream.frames.lock().len();
        crate::assert_with_log!(sent == 0, "nothing sent", 0, sent);
        let codes = completions.lock().clone();
        crate::assert_with_log!(
            codes == vec![StatusCode::Aborted],
            "aborted locally",
            vec![StatusCode::Aborted],
            codes
        );
        crate::test_complete!("serializer_failure_aborts_locally");
    }

    #[test]
    fn deadline_timer_synthesizes_deadline_exceeded() {
        init_test("deadline_timer_synthesizes_deadline_exceeded");
        let (agent, _stream, timers) = test_agent(None);
        let completions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&completions);
        agent.perform_rpc_call(
            2,
            50,
            None::<fn(&mut BytesMut) -> bool>,
            Box::new(move |status, _payload| {
                seen.lock().push(status.code());
            }),
        );
        let timer = Arc::clone(&timers.lock()[0]);
        timer.fire();

        let codes = completions.lock().clone();
        crate::assert_with_log!(
            codes == vec![StatusCode::DeadlineExceeded],
            "deadline exceeded",
            vec![StatusCode::DeadlineExceeded],
            codes
        );
        let outstanding = agent.inner.outstanding.lock().len();
        crate::assert_with_log!(outstanding == 0, "entry removed", 0, outstanding);
        crate::test_complete!("deadline_timer_synthesizes_deadline_exceeded");
    }

    #[test]
    fn response_after_timeout_is_dropped() {
        init_test("response_after_timeout_is_dropped");
        let (agent, _stream, timers) = test_agent(None);
        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        let request_id = agent.perform_rpc_call(
            3,
            50,
            None::<fn(&mut BytesMut) -> bool>,
            Box::new(move |status, _payload| {
                assert_eq!(status.code(), StatusCode::DeadlineExceeded);
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timers.lock()[0].fire();

        let mut buf = BytesMut::new();
        envelope::encode_response_header(&mut buf, request_id, &Status::ok_status()).unwrap();
        agent.on_message(buf.freeze());

        let count = completions.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "late response dropped", 1, count);
        crate::test_complete!("response_after_timeout_is_dropped");
    }

    #[test]
    fn wire_response_cancels_the_timer() {
        init_test("wire_response_cancels_the_timer");
        let (agent, _stream, timers) = test_agent(None);
        let completions = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&completions);
        let request_id = agent.perform_rpc_call(
            3,
            50,
            None::<fn(&mut BytesMut) -> bool>,
            Box::new(move |status, _payload| {
                assert!(status.ok());
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let mut buf = BytesMut::new();
        envelope::encode_response_header(&mut buf, request_id, &Status::ok_status()).unwrap();
        agent.on_message(buf.freeze());

        // The timer fires later but must see the cancellation.
        timers.lock()[0].fire();
        let count = completions.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 1, "single ok completion", 1, count);
        crate::test_complete!("wire_response_cancels_the_timer");
    }

    #[test]
    fn cancel_call_completes_cancelled() {
        init_test("cancel_call_completes_cancelled");
        let (agent, _stream, _) = test_agent(None);
        let completions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&completions);
        let request_id = agent.perform_rpc_call(
            5,
            0,
            None::<fn(&mut BytesMut) -> bool>,
            Box::new(move |status, _payload| {
                seen.lock().push(status.code());
            }),
        );
        agent.cancel_call(request_id);
        agent.cancel_call(request_id); // idempotent

        let codes = completions.lock().clone();
        crate::assert_with_log!(
            codes == vec![StatusCode::Cancelled],
            "cancelled once",
            vec![StatusCode::Cancelled],
            codes
        );
        crate::test_complete!("cancel_call_completes_cancelled");
    }

    #[test]
    fn close_resolves_outstanding_as_unavailable() {
        init_test("close_resolves_outstanding_as_unavailable");
        let (agent, _stream, _) = test_agent(None);
        let completions = Arc::new(Mutex::new(Vec::new()));
        for call_id in 0..3 {
            let seen = Arc::clone(&completions);
            agent.perform_rpc_call(
                call_id,
                0,
                None::<fn(&mut BytesMut) -> bool>,
                Box::new(move |status, _payload| {
                    seen.lock().push(status.code());
                }),
            );
        }
        agent.on_close(1000, "bye");

        let codes = completions.lock().clone();
        crate::assert_with_log!(
            codes == vec![StatusCode::Unavailable; 3],
            "all unavailable",
            vec![StatusCode::Unavailable; 3],
            codes
        );
        let closed = agent.is_closed();
        crate::assert_with_log!(closed, "agent closed", true, closed);
        crate::test_complete!("close_resolves_outstanding_as_unavailable");
    }

    #[test]
    fn write_error_tears_the_connection_down() {
        init_test("write_error_tears_the_connection_down");
        let (agent, stream, _) = test_agent(None);
        let completions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&completions);
        agent.perform_rpc_call(
            1,
            0,
            None::<fn(&mut BytesMut) -> bool>,
            Box::new(move |status, _payload| {
                seen.lock().push(status.code());
            }),
        );
        agent.on_error(StreamOp::Write, StreamError::Io("broken pipe".to_string()));

        let codes = completions.lock().clone();
        crate::assert_with_log!(
            codes == vec![StatusCode::Unavailable],
            "unavailable after write error",
            vec![StatusCode::Unavailable],
            codes
        );
        let closes = stream.closes.lock().len();
        crate::assert_with_log!(closes == 1, "stream closed", 1, closes);
        crate::test_complete!("write_error_tears_the_connection_down");
    }

    #[test]
    fn request_ids_are_monotonic() {
        init_test("request_ids_are_monotonic");
        let (agent, _stream, _) = test_agent(None);
        let first = agent.perform_rpc_call(
            0,
            0,
            None::<fn(&mut BytesMut) -> bool>,
            Box::new(|_, _| {}),
        );
        let second = agent.perform_rpc_call(
            0,
            0,
            None::<fn(&mut BytesMut) -> bool>,
            Box::new(|_, _| {}),
        );
        crate::assert_with_log!(second == first + 1, "monotonic ids", first + 1, second);
        crate::test_complete!("request_ids_are_monotonic");
    }

    #[test]
    fn finish_call_past_deadline_becomes_deadline_exceeded() {
        init_test("finish_call_past_deadline_becomes_deadline_exceeded");
        let handler: CallHandler<InlineExecutor> = Box::new(|context, _payload| {
            Task::new(move || {
                std::thread::sleep(Duration::from_millis(30));
                context.finish_call(Status::ok_status());
            })
        });
        let (agent, stream, _) = test_agent(Some(handler));
        agent.on_message(request_frame(8, 1, 10, b""));

        let frames = stream.frames.lock();
        let envelope = decode_response(&frames[0]).unwrap();
        let code = envelope.status.code();
        crate::assert_with_log!(
            code == StatusCode::DeadlineExceeded,
            "late ok converted",
            StatusCode::DeadlineExceeded,
            code
        );
        crate::test_complete!("finish_call_past_deadline_becomes_deadline_exceeded");
    }

    #[test]
    fn context_finish_is_idempotent() {
        init_test("context_finish_is_idempotent");
        let handler: CallHandler<InlineExecutor> = Box::new(|context, _payload| {
            Task::new(move || {
                context.finish_call(Status::ok_status());
                context.finish_call(Status::new(StatusCode::Internal)); // no-op
                context.cancel(); // no-op
            })
        });
        let (agent, stream, _) = test_agent(Some(handler));
        agent.on_message(request_frame(6, 1, 0, b""));

        let frames = stream.frames.lock();
        crate::assert_with_log!(frames.len() == 1, "single response", 1, frames.len());
        let envelope = decode_response(&frames[0]).unwrap();
        let ok = envelope.status.ok();
        crate::assert_with_log!(ok, "first finish wins", true, ok);
        crate::test_complete!("context_finish_is_idempotent");
    }
}
