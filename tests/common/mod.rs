#![allow(dead_code)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::{Arc, Once};
use tracing_subscriber::fmt::format::FmtSpan;
use weft::net::{MessageStream, StreamHandler};

static INIT_LOGGING: Once = Once::new();

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

#[derive(Default)]
struct LoopbackInner {
    peer: Mutex<Option<Arc<dyn StreamHandler>>>,
    closes: Mutex<Vec<(u16, String)>>,
}

/// One direction of an in-memory duplex connection.
///
/// Frames sent into this half are delivered synchronously to the connected
/// peer's `on_message`, which satisfies the carrier contract of serial
/// delivery per connection. Replaces a real TLS WebSocket carrier for
/// agent-to-agent tests.
#[derive(Clone, Default)]
pub struct LoopbackHalf {
    inner: Arc<LoopbackInner>,
}

impl LoopbackHalf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wires this half to deliver into `peer`.
    pub fn connect(&self, peer: Arc<dyn StreamHandler>) {
        *self.inner.peer.lock() = Some(peer);
    }

    /// Close frames recorded on this half.
    pub fn closes(&self) -> Vec<(u16, String)> {
        self.inner.closes.lock().clone()
    }
}

impl MessageStream for LoopbackHalf {
    fn send(&self, frame: Bytes) {
        let peer = self.inner.peer.lock().clone();
        if let Some(peer) = peer {
            peer.on_message(frame);
        }
    }

    fn close(&self, code: u16, reason: &str) {
        self.inner.closes.lock().push((code, reason.to_string()));
        let peer = self.inner.peer.lock().clone();
        if let Some(peer) = peer {
            peer.on_close(code, reason);
        }
    }
}
