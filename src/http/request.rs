use std::time::Duration;

use url::Url;

use crate::error::TransportError;
use crate::http::header::validate_http_header;

/// An outgoing HTTP request.
///
/// Requests are immutable once handed to a transport; the payload travels
/// separately so the same request description can be reissued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Explicit method. `None` means `GET`, or `POST` when a payload is attached.
    pub method: Option<String>,
    /// Absolute request URL.
    pub url: String,
    /// Header lines in `name: value` form, sent in this order.
    pub headers: Vec<String>,
    /// Ask the engine to advertise the encodings it can decode.
    pub accept_encoding: bool,
    /// User agent; the transport appends its own suffix.
    pub user_agent: String,
}

impl HttpRequest {
    /// Shorthand for a plain `GET` of `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: None,
            url: url.into(),
            headers: Vec::new(),
            accept_encoding: false,
            user_agent: String::new(),
        }
    }

    /// The verb that will appear on the wire for a given payload.
    pub fn effective_method(&self, has_payload: bool) -> &str {
        match self.method.as_deref() {
            Some(m) if !m.is_empty() => m,
            _ if has_payload => "POST",
            _ => "GET",
        }
    }
}

/// Builder for [`HttpRequest`] with validation of URL and headers.
pub struct HttpRequestBuilder {
    method: Option<String>,
    url: String,
    query: Vec<(String, String)>,
    headers: Vec<String>,
    accept_encoding: bool,
    user_agent: String,
}

impl HttpRequestBuilder {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        let method = method.into();
        Self {
            method: (!method.is_empty()).then_some(method),
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            accept_encoding: false,
            user_agent: String::new(),
        }
    }

    /// Adds a raw header line such as `"x-goog-meta: 1"`.
    pub fn add_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    pub fn add_query_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Requests bytes `[start, end)`; an open range when `end` is `None`.
    pub fn add_range_header(self, start: u64, end: Option<u64>) -> Self {
        match end {
            Some(end) if end > start => {
                self.add_header(format!("Range: bytes={}-{}", start, end - 1))
            }
            Some(_) => self,
            None => self.add_header(format!("Range: bytes={}-", start)),
        }
    }

    pub fn add_cache_control_max_age_header(self, max_age: Duration) -> Self {
        if max_age.is_zero() {
            self.add_header("Cache-Control: no-cache")
        } else {
            self.add_header(format!("Cache-Control: max-age={}", max_age.as_secs()))
        }
    }

    pub fn accept_encoding(mut self, enable: bool) -> Self {
        self.accept_encoding = enable;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<HttpRequest, TransportError> {
        let mut url = Url::parse(&self.url).map_err(|e| {
            TransportError::invalid_argument(format!("Invalid URL {:?}: {}", self.url, e))
        })?;
        if !self.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &self.query {
                pairs.append_pair(k, v);
            }
        }
        for header in &self.headers {
            validate_http_header(header)?;
        }
        Ok(HttpRequest {
            method: self.method,
            url: url.into(),
            headers: self.headers,
            accept_encoding: self.accept_encoding,
            user_agent: self.user_agent,
        })
    }
}
