//! RPC status codes and the response status record.
//!
//! The ordinals are part of the wire contract: response envelopes carry
//! the code as a single signed byte and both peers must agree on the
//! numbering. Note that the ordering is not gRPC's — `Unauthenticated`
//! sits at ordinal 8 here.

use std::fmt;

/// Status codes carried by response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i8)]
pub enum StatusCode {
    /// Not an error; returned on success.
    #[default]
    Ok = 0,
    /// The operation was cancelled, typically by the caller.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// The caller specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// The entity a caller attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission to execute the operation.
    PermissionDenied = 7,
    /// The request does not have valid authentication credentials.
    Unauthenticated = 8,
    /// Some resource has been exhausted.
    ResourceExhausted = 9,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 10,
    /// The operation was aborted.
    Aborted = 11,
    /// The operation was attempted past the valid range.
    OutOfRange = 12,
    /// The operation is not implemented or not supported.
    Unimplemented = 13,
    /// Internal error.
    Internal = 14,
    /// The service is currently unavailable.
    Unavailable = 15,
    /// Unrecoverable data loss or corruption.
    DataLoss = 16,
    /// Reserved sentinel; never sent deliberately.
    DoNotUse = 17,
}

impl StatusCode {
    /// Converts a wire byte into a code. `None` for out-of-range values;
    /// decoders reject such frames.
    #[must_use]
    pub fn from_i8(value: i8) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Cancelled),
            2 => Some(Self::Unknown),
            3 => Some(Self::InvalidArgument),
            4 => Some(Self::DeadlineExceeded),
            5 => Some(Self::NotFound),
            6 => Some(Self::AlreadyExists),
            7 => Some(Self::PermissionDenied),
            8 => Some(Self::Unauthenticated),
            9 => Some(Self::ResourceExhausted),
            10 => Some(Self::FailedPrecondition),
            11 => Some(Self::Aborted),
            12 => Some(Self::OutOfRange),
            13 => Some(Self::Unimplemented),
            14 => Some(Self::Internal),
            15 => Some(Self::Unavailable),
            16 => Some(Self::DataLoss),
            17 => Some(Self::DoNotUse),
            _ => None,
        }
    }

    /// The wire byte for this code.
    #[must_use]
    pub const fn as_i8(self) -> i8 {
        self as i8
    }

    /// Returns the canonical name for this code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Cancelled => "CANCELLED",
            Self::Unknown => "UNKNOWN",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::Aborted => "ABORTED",
            Self::OutOfRange => "OUT_OF_RANGE",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::Unavailable => "UNAVAILABLE",
            Self::DataLoss => "DATA_LOSS",
            Self::DoNotUse => "DO_NOT_USE",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status with code, message, and optional details, as carried by
/// response envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    code: StatusCode,
    message: String,
    details: String,
}

impl Status {
    /// A bare status with empty message and details.
    #[must_use]
    pub fn new(code: StatusCode) -> Self {
        Self {
            code,
            message: String::new(),
            details: String::new(),
        }
    }

    /// A status with a human-readable message.
    #[must_use]
    pub fn with_message(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: String::new(),
        }
    }

    /// A status with message and details.
    #[must_use]
    pub fn with_details(
        code: StatusCode,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: details.into(),
        }
    }

    /// The success status.
    #[must_use]
    pub fn ok_status() -> Self {
        Self::new(StatusCode::Ok)
    }

    /// The status code.
    #[must_use]
    pub const fn code(&self) -> StatusCode {
        self.code
    }

    /// The error message (empty on success).
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error details (usually empty).
    #[must_use]
    pub fn details(&self) -> &str {
        &self.details
    }

    /// `true` iff the code is [`StatusCode::Ok`].
    #[must_use]
    pub const fn ok(&self) -> bool {
        matches!(self.code, StatusCode::Ok)
    }
}

impl From<StatusCode> for Status {
    fn from(code: StatusCode) -> Self {
        Self::new(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}
