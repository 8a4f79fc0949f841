//! Error types and error handling strategy.
//!
//! Errors are explicit and typed. The categories are:
//!
//! - **Futures** ([`FutureError`]): misuse of a promise/future/packaged-task
//!   handle, or a broken producer
//! - **Framing** ([`FrameError`]): a malformed RPC envelope; non-terminal,
//!   the offending frame is dropped
//! - **Configuration** ([`crate::config::ConfigError`]): rejected knobs
//!
//! A wait that expires is a status ([`crate::future::FutureStatus::Timeout`]),
//! not an error. Invariant violations and panics escaping a pool task are
//! fatal and terminate the process.

use thiserror::Error;

/// Errors from promise, future, and packaged-task operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FutureError {
    /// The handle's shared state has already been released.
    #[error("no associated shared state")]
    NoState,

    /// The producing side was invoked twice.
    #[error("promise already satisfied")]
    AlreadySet,

    /// `get_future` was called twice on the same producer.
    #[error("future already retrieved")]
    AlreadyRetrieved,

    /// The producer was cancelled or dropped without setting a value.
    #[error("broken promise")]
    BrokenPromise,
}

/// Errors from encoding or decoding RPC envelopes.
///
/// Decode errors are localized to the offending frame; the agent drops the
/// frame and carries on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The buffer ended before the fixed header was complete.
    #[error("frame truncated")]
    Truncated,

    /// The leading tag byte named neither a request nor a response.
    #[error("invalid envelope tag: {0}")]
    BadTag(i8),

    /// The status ordinal was outside the enumerated range.
    #[error("invalid status code: {0}")]
    BadStatusCode(i8),

    /// A length prefix pointed past the end of the buffer.
    #[error("length prefix overruns frame")]
    LengthOverrun,

    /// An error-message or error-details field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    BadUtf8,

    /// A string field exceeded the u32 length prefix.
    #[error("field too large for length prefix")]
    FieldTooLarge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_error_display() {
        assert_eq!(FutureError::NoState.to_string(), "no associated shared state");
        assert_eq!(FutureError::AlreadySet.to_string(), "promise already satisfied");
        assert_eq!(
            FutureError::AlreadyRetrieved.to_string(),
            "future already retrieved"
        );
        assert_eq!(FutureError::BrokenPromise.to_string(), "broken promise");
    }

    #[test]
    fn frame_error_display() {
        assert_eq!(FrameError::Truncated.to_string(), "frame truncated");
        assert_eq!(FrameError::BadTag(7).to_string(), "invalid envelope tag: 7");
        assert_eq!(
            FrameError::BadStatusCode(99).to_string(),
            "invalid status code: 99"
        );
    }
}
