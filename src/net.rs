//! Contracts for the framed duplex stream carrier.
//!
//! The secure WebSocket carrier itself lives outside this crate; the RPC
//! agent only depends on these two traits. Events on [`StreamHandler`] are
//! delivered serially per connection, and [`MessageStream::send`] takes
//! ownership of the buffer and completes asynchronously — failures surface
//! later through [`StreamHandler::on_error`].

use bytes::Bytes;
use thiserror::Error;

/// Which carrier operation an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOp {
    /// Accepting a connection.
    Accept,
    /// TLS/WebSocket handshake.
    Handshake,
    /// Reading a frame.
    Read,
    /// Writing a frame.
    Write,
    /// Orderly shutdown.
    Close,
}

/// A carrier-level failure.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// The connection was closed by the peer.
    #[error("connection closed")]
    Closed,

    /// The connection was reset.
    #[error("connection reset")]
    Reset,

    /// Protocol violation in the carrier framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

/// The outbound half of a framed duplex stream.
pub trait MessageStream: Send + Sync {
    /// Queues `frame` for transmission, taking ownership. Completes
    /// asynchronously; write failures surface via
    /// [`StreamHandler::on_error`] with [`StreamOp::Write`].
    fn send(&self, frame: Bytes);

    /// Initiates an orderly shutdown. A subsequent
    /// [`StreamHandler::on_close`] is guaranteed.
    fn close(&self, code: u16, reason: &str);
}

/// The inbound event sink of a framed duplex stream.
///
/// The carrier invokes these serially per connection.
pub trait StreamHandler: Send + Sync {
    /// The connection is established and frames may flow.
    fn on_connect(&self) {}

    /// A complete frame arrived.
    fn on_message(&self, frame: Bytes);

    /// The connection closed.
    fn on_close(&self, code: u16, reason: &str);

    /// A carrier operation failed.
    fn on_error(&self, op: StreamOp, error: StreamError);
}
