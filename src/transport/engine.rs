//! Transfer engine abstraction.
//!
//! A [`TransferEngine`] performs the wire-level work for every admitted
//! handle: resolution, connection management and HTTP framing. The
//! dispatcher drives it from a single thread:
//!
//! ```text
//! add(token, handle)        admission, no I/O
//! perform(callbacks)        advance whatever is ready, never blocks
//! next_completion()         drain finished transfers
//! remove(token, handle)     detach a finished transfer
//! poll(timeout)             block until readiness, timeout or wakeup
//! ```
//!
//! Per-request data never passes through the engine as a raw pointer.
//! Transfers are identified by a [`Token`] and the engine reaches the
//! owning request through the [`TransferCallbacks`] table it is handed on
//! every `perform` call.
//!
//! **Contract:** only `Wakeup::wake` may be called from other threads.
//! A wake that arrives before `poll` is entered must make that `poll`
//! return promptly.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ErrorCode, TransportError};
use crate::transport::handle::TransferHandle;

/// Identifies one admitted transfer inside an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Engine-level result codes. These never reach callers directly; see
/// [`EngineCode::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineCode {
    Ok,
    UrlMalformed,
    UnsupportedProtocol,
    BadOption,
    CouldNotResolveHost,
    CouldNotConnect,
    TimedOut,
    SendError,
    RecvError,
    GotNothing,
    /// The peer violated HTTP framing; the connection must not be reused.
    Framing,
    /// The body ended before its declared length.
    PartialBody,
    /// The write callback consumed fewer bytes than offered.
    WriteAborted,
    /// The read callback supplied fewer bytes than the declared upload size.
    ReadAborted,
    /// Removed by the dispatcher before the transfer finished.
    Aborted,
    Internal,
}

impl EngineCode {
    pub fn is_ok(&self) -> bool {
        *self == EngineCode::Ok
    }

    pub fn description(&self) -> &'static str {
        match self {
            EngineCode::Ok => "no error",
            EngineCode::UrlMalformed => "URL using bad/illegal format",
            EngineCode::UnsupportedProtocol => "unsupported protocol",
            EngineCode::BadOption => "a transfer option was invalid",
            EngineCode::CouldNotResolveHost => "could not resolve host name",
            EngineCode::CouldNotConnect => "could not connect to server",
            EngineCode::TimedOut => "operation timed out",
            EngineCode::SendError => "failed sending data to the peer",
            EngineCode::RecvError => "failure when receiving data from the peer",
            EngineCode::GotNothing => "server returned nothing",
            EngineCode::Framing => "protocol framing error",
            EngineCode::PartialBody => "transferred a partial body",
            EngineCode::WriteAborted => "failed writing received data",
            EngineCode::ReadAborted => "upload payload ended early",
            EngineCode::Aborted => "transfer aborted",
            EngineCode::Internal => "internal engine error",
        }
    }

    /// Translates the engine code to the caller-facing taxonomy.
    /// Returns `None` for [`EngineCode::Ok`].
    pub fn status(&self) -> Option<ErrorCode> {
        match self {
            EngineCode::Ok => None,
            EngineCode::UrlMalformed | EngineCode::UnsupportedProtocol | EngineCode::BadOption => {
                Some(ErrorCode::InvalidArgument)
            }
            EngineCode::CouldNotResolveHost
            | EngineCode::CouldNotConnect
            | EngineCode::TimedOut
            | EngineCode::SendError
            | EngineCode::RecvError
            | EngineCode::GotNothing
            | EngineCode::Framing
            | EngineCode::PartialBody
            | EngineCode::Aborted => Some(ErrorCode::Unavailable),
            EngineCode::WriteAborted | EngineCode::ReadAborted | EngineCode::Internal => {
                Some(ErrorCode::Internal)
            }
        }
    }

    /// Builds the caller-facing error for a non-ok code.
    pub fn to_error(&self, detail: &str) -> TransportError {
        let code = self.status().unwrap_or(ErrorCode::Internal);
        if detail.is_empty() {
            TransportError::new(code, self.description())
        } else {
            TransportError::new(code, format!("{}: {}", self.description(), detail))
        }
    }
}

impl fmt::Display for EngineCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Failure reported synchronously by an engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub code: EngineCode,
    pub detail: String,
}

impl EngineError {
    pub fn new(code: EngineCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.detail)
        }
    }
}

impl std::error::Error for EngineError {}

/// A finished transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub token: Token,
    pub code: EngineCode,
    /// Human-readable diagnostic accompanying a non-ok code.
    pub detail: String,
}

/// Whether `perform` may have more immediately available work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Again,
    Idle,
}

/// Per-transfer callbacks the engine invokes while performing.
///
/// All calls happen on the dispatcher thread, inside `perform`.
pub trait TransferCallbacks {
    /// Response body bytes. Returning less than `data.len()` aborts the transfer.
    fn on_write(&mut self, token: Token, data: &[u8]) -> usize;

    /// Fills `buf` with upload bytes. Returns 0 at end of payload.
    fn on_read(&mut self, token: Token, buf: &mut [u8]) -> usize;

    /// One raw status or header line, including the trailing CRLF.
    fn on_header(&mut self, token: Token, line: &[u8]) -> usize;
}

/// Cross-thread signal that interrupts [`TransferEngine::poll`].
pub trait Wakeup: Send + Sync {
    fn wake(&self);
}

/// The opaque I/O multiplexer driven by the dispatcher.
pub trait TransferEngine: Send + 'static {
    /// Registers a configured handle. No network activity happens until the
    /// next `perform`.
    fn add(&mut self, token: Token, handle: &mut TransferHandle) -> Result<(), EngineError>;

    /// Detaches a transfer. Called exactly once for every admitted token,
    /// after its completion has been drained or to abort it. Honors
    /// `handle.options.forbid_reuse` when deciding the connection's fate.
    fn remove(&mut self, token: Token, handle: &mut TransferHandle);

    /// Advances every admitted transfer as far as it can go without blocking.
    fn perform(&mut self, callbacks: &mut dyn TransferCallbacks) -> Progress;

    /// Pops the next finished transfer, if any.
    fn next_completion(&mut self) -> Option<Completion>;

    /// Waits for readiness, a wakeup, or `timeout`, whichever comes first.
    fn poll(&mut self, timeout: Duration) -> Result<(), EngineError>;

    /// The wakeup primitive for this engine.
    fn waker(&self) -> Arc<dyn Wakeup>;
}
