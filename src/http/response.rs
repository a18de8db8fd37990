use bytes::Bytes;

use crate::http::header::{try_parse_content_range_header, HeaderMap};

/// A completed HTTP response.
///
/// The payload is frozen once the transfer finishes; headers appear in the
/// order the server sent them, repeated names included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    /// Numeric status code from the final status line.
    pub status_code: u16,
    pub headers: HeaderMap,
    pub payload: Bytes,
}

impl HttpResponse {
    pub fn new(status_code: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            status_code,
            headers: HeaderMap::new(),
            payload: payload.into(),
        }
    }

    /// Appends a header, keeping any previous values for the same name.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// `(start, end, total)` from a `content-range` header, if well-formed.
    pub fn content_range(&self) -> Option<(u64, u64, u64)> {
        try_parse_content_range_header(&self.headers)
    }
}
