//! Concurrent request transport.
//!
//! - **`dispatcher`**: the background control loop multiplexing requests over an engine
//! - **`engine`**: the [`TransferEngine`] contract the dispatcher drives
//! - **`handle`**: transfer handles and the [`HandleFactory`] that recycles them
//! - **`state`**: per-request state bridging engine callbacks and the caller's future
//! - **`future`**: the single-assignment [`ResponseFuture`] returned to callers
//! - **`global`**: the process-wide default transport

pub mod dispatcher;
pub mod engine;
pub mod future;
pub mod global;
pub mod handle;
pub mod state;

use std::time::Duration;

use bytes::Bytes;

use crate::http::HttpRequest;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use engine::{
    Completion, EngineCode, EngineError, Progress, Token, TransferCallbacks, TransferEngine, Wakeup,
};
pub use future::{promise_future_pair, Promise, ResponseFuture, ResponseResult};
pub use global::{default_transport, set_default_transport};
pub use handle::{HandleFactory, PooledHandleFactory, TransferHandle, TransferOptions};

/// Issues HTTP requests and hands back their eventual outcome.
///
/// Callers must not depend on when a request is admitted, on which thread
/// it runs, or on completion order between requests.
pub trait HttpTransport: Send + Sync {
    fn issue_request(
        &self,
        request: &HttpRequest,
        payload: Bytes,
        request_timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
    ) -> ResponseFuture;

    /// Blocks until every request issued so far has resolved. Transports
    /// that resolve requests synchronously return immediately.
    fn wait_idle(&self) {}
}
