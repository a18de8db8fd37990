//! Courier - concurrent HTTP request transport
//!
//! A single background dispatcher thread multiplexes many outstanding
//! requests over one transfer engine and hands each caller a future for
//! its response.

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod mock;
pub mod transport;

pub use error::{ErrorCode, TransportError};
pub use http::{HeaderMap, HttpRequest, HttpRequestBuilder, HttpResponse};
pub use transport::{default_transport, set_default_transport, HttpTransport, ResponseFuture};
