//! Transport error taxonomy.
//!
//! Every failure that reaches a caller is expressed as a [`TransportError`]
//! carrying one of a small, stable set of [`ErrorCode`]s. Engine-specific
//! codes are translated before they cross the transport boundary.

use std::fmt;

use thiserror::Error;

/// Stable error classification exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The request itself is malformed (bad URL, unsupported scheme, bad header).
    InvalidArgument,
    /// The remote side could not be reached or the transfer did not complete.
    /// Callers may retry these.
    Unavailable,
    /// A local invariant was violated.
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::Unavailable => "unavailable",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error delivered through a response future.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: ErrorCode,
    pub message: String,
}

impl TransportError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// Whether a caller-side retry policy may reasonably retry this error.
    pub fn is_retryable(&self) -> bool {
        self.code == ErrorCode::Unavailable
    }
}
