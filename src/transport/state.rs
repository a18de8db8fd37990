//! Per-request state.
//!
//! A [`RequestState`] owns one transfer handle from creation until it is
//! dropped, the upload payload with its read cursor, the response being
//! accumulated and the promise that publishes the outcome. Dropping the
//! state returns the handle to its factory, so the handle is released
//! exactly once on every path.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::TransportError;
use crate::http::header::append_header_data;
use crate::http::{HttpRequest, HttpResponse};
use crate::transport::future::{Promise, ResponseResult};
use crate::transport::handle::{HandleFactory, TransferHandle};

pub struct RequestState {
    factory: Arc<dyn HandleFactory>,
    handle: Option<TransferHandle>,
    payload: Bytes,
    cursor: usize,
    response: HttpResponse,
    body: BytesMut,
    promise: Option<Promise>,
}

impl RequestState {
    /// Checks a handle out of `factory`. Fails fast if the factory refuses.
    pub fn new(
        factory: Arc<dyn HandleFactory>,
        promise: Promise,
    ) -> Result<Self, (TransportError, Promise)> {
        match factory.create_handle() {
            Ok(handle) => Ok(Self {
                factory,
                handle: Some(handle),
                payload: Bytes::new(),
                cursor: 0,
                response: HttpResponse::default(),
                body: BytesMut::new(),
                promise: Some(promise),
            }),
            Err(e) => Err((e, promise)),
        }
    }

    /// Configures the handle for `request`.
    ///
    /// A non-empty payload puts the handle into streaming upload mode. If the
    /// request also names a method, the upload mode wins; the verb itself is
    /// still sent as given.
    pub fn setup(
        &mut self,
        request: &HttpRequest,
        payload: Bytes,
        request_timeout: Option<Duration>,
        connect_timeout: Option<Duration>,
        user_agent_suffix: &str,
        verbose: bool,
    ) {
        let has_payload = !payload.is_empty();
        let Some(handle) = self.handle.as_mut() else {
            return;
        };
        let options = &mut handle.options;

        options.url = request.url.clone();
        options.headers = request.headers.clone();
        options.accept_encoding = request.accept_encoding;
        options.user_agent = match (request.user_agent.is_empty(), user_agent_suffix.is_empty()) {
            (true, _) => user_agent_suffix.to_string(),
            (false, true) => request.user_agent.clone(),
            (false, false) => format!("{} {}", request.user_agent, user_agent_suffix),
        };
        options.request_timeout = request_timeout.filter(|d| !d.is_zero());
        options.connect_timeout = connect_timeout.filter(|d| !d.is_zero());
        options.verbose = verbose;
        options.method = request.effective_method(has_payload).to_string();
        options.no_body = options.method.eq_ignore_ascii_case("HEAD");

        if has_payload {
            if let Some(method) = request.method.as_deref().filter(|m| !m.is_empty()) {
                tracing::info!(
                    method,
                    url = %request.url,
                    "Custom HTTP method combined with a payload; sending as an upload"
                );
            }
            options.upload_size = Some(payload.len() as u64);
            self.payload = payload;
            self.cursor = 0;
        }
    }

    pub fn handle(&self) -> Option<&TransferHandle> {
        self.handle.as_ref()
    }

    pub fn handle_mut(&mut self) -> Option<&mut TransferHandle> {
        self.handle.as_mut()
    }

    /// Whether anyone is still waiting on this request's future.
    pub fn result_needed(&self) -> bool {
        self.promise.as_ref().is_some_and(Promise::result_needed)
    }

    /// Appends received body bytes.
    pub fn write(&mut self, data: &[u8]) -> usize {
        self.body.extend_from_slice(data);
        data.len()
    }

    /// Copies the next upload bytes into `buf` and advances the cursor.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let remaining = &self.payload[self.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        n
    }

    /// Records one raw status or header line.
    pub fn header(&mut self, line: &[u8]) -> usize {
        if line.starts_with(b"HTTP/") {
            if let Some(code) = parse_status_code(line) {
                self.response.status_code = code;
            }
            return line.len();
        }
        append_header_data(&mut self.response.headers, line)
    }

    /// Marks the handle's connection as unfit for reuse.
    pub fn forbid_reuse(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            handle.options.forbid_reuse = true;
        }
    }

    /// Publishes the outcome. Later calls are no-ops.
    pub fn fulfill(&mut self, result: ResponseResult) {
        if let Some(promise) = self.promise.take() {
            promise.set_result(result);
        }
    }

    /// Freezes the accumulated response and publishes it.
    pub fn succeed(&mut self) {
        let mut response = std::mem::take(&mut self.response);
        response.payload = std::mem::take(&mut self.body).freeze();
        self.fulfill(Ok(response));
    }

    pub fn fail(&mut self, error: TransportError) {
        self.fulfill(Err(error));
    }
}

impl Drop for RequestState {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.factory.cleanup_handle(handle);
        }
    }
}

/// Extracts the status code from `HTTP/x.y NNN reason`.
fn parse_status_code(line: &[u8]) -> Option<u16> {
    let line = std::str::from_utf8(line).ok()?;
    let code = line.split_ascii_whitespace().nth(1)?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}
