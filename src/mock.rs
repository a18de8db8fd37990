//! In-memory transport returning canned responses.
//!
//! Responses are keyed by `"METHOD url"`. Unknown requests get a 404 with an
//! empty body. Every issued request is recorded for later inspection.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::http::{HttpRequest, HttpResponse};
use crate::transport::{HttpTransport, ResponseFuture};

/// Adds `content-length` and `content-type` when the response lacks them.
pub fn add_default_headers(response: &mut HttpResponse) {
    if !response.headers.contains("content-length") {
        let len = response.payload.len().to_string();
        response.headers.append("content-length", len);
    }
    if !response.headers.contains("content-type") {
        response
            .headers
            .append("content-type", "application/octet-stream");
    }
}

#[derive(Default)]
struct MockState {
    responses: HashMap<String, HttpResponse>,
    requests: Vec<(HttpRequest, Bytes)>,
}

#[derive(Default)]
pub struct MockHttpTransport {
    state: Mutex<MockState>,
}

impl MockHttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the canned responses and forgets recorded requests.
    pub fn reset(&self, mut responses: HashMap<String, HttpResponse>, add_headers: bool) {
        if add_headers {
            responses.values_mut().for_each(add_default_headers);
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.requests.clear();
        state.responses = responses;
    }

    /// Requests issued so far, with their payloads.
    pub fn requests(&self) -> Vec<(HttpRequest, Bytes)> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
            .clone()
    }
}

impl HttpTransport for MockHttpTransport {
    fn issue_request(
        &self,
        request: &HttpRequest,
        payload: Bytes,
        _request_timeout: Option<Duration>,
        _connect_timeout: Option<Duration>,
    ) -> ResponseFuture {
        let key = format!("{} {}", request.effective_method(!payload.is_empty()), request.url);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.requests.push((request.clone(), payload));

        let response = state
            .responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| HttpResponse::new(404, Bytes::new()));
        ResponseFuture::ready(Ok(response))
    }
}
