//! HTTP value types shared by every transport.
//!
//! - **`request`**: the immutable [`HttpRequest`] description and its builder
//! - **`response`**: the [`HttpResponse`] produced when a transfer completes
//! - **`header`**: the append-only [`HeaderMap`] and header-line parsing
//!
//! None of these types perform I/O; transports turn a request plus payload
//! into a response future.

pub mod header;
pub mod request;
pub mod response;

pub use header::HeaderMap;
pub use request::{HttpRequest, HttpRequestBuilder};
pub use response::HttpResponse;
