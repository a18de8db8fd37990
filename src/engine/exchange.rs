//! One HTTP/1.1 exchange over a TCP connection.
//!
//! The exchange runs as a task on the engine's runtime. It never touches
//! request state directly: header lines and body chunks are sent to the
//! engine as [`Event`]s, and upload bytes are requested from the engine,
//! which answers through the request's read callback.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;
use url::{Host, Url};

use crate::transport::engine::{EngineCode, EngineError, Token};
use crate::transport::handle::TransferOptions;

/// Upload bytes requested from the read callback at a time.
pub const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// Default buffer size for reading responses.
const READ_CHUNK: usize = 8192;

/// Prevent unbounded header growth.
const MAX_HEAD_SIZE: usize = 64 * 1024;

const MAX_LINE_SIZE: usize = 8 * 1024;

/// An open connection to one origin.
#[derive(Debug)]
pub(crate) struct Connection {
    pub stream: TcpStream,
    pub origin: String,
}

/// Messages from exchange tasks to the engine.
#[derive(Debug)]
pub(crate) enum Event {
    Header {
        token: Token,
        line: Bytes,
    },
    Body {
        token: Token,
        data: Bytes,
    },
    Read {
        token: Token,
        max: usize,
        reply: oneshot::Sender<Bytes>,
    },
    Done {
        token: Token,
        code: EngineCode,
        detail: String,
        connection: Option<Connection>,
    },
}

/// Sending half used by a task; every send also signals the engine.
#[derive(Clone)]
pub(crate) struct Channel {
    pub token: Token,
    pub events: mpsc::UnboundedSender<Event>,
    pub signal: Arc<Notify>,
}

impl Channel {
    fn emit(&self, event: Event) -> Result<(), WireError> {
        let sent = self.events.send(event).is_ok();
        self.signal.notify_one();
        if sent {
            Ok(())
        } else {
            Err(WireError::Detached)
        }
    }

    fn header(&self, line: &[u8]) -> Result<(), WireError> {
        let mut owned = BytesMut::with_capacity(line.len() + 2);
        owned.extend_from_slice(line);
        owned.extend_from_slice(b"\r\n");
        self.emit(Event::Header {
            token: self.token,
            line: owned.freeze(),
        })
    }

    fn body(&self, data: Bytes) -> Result<(), WireError> {
        self.emit(Event::Body {
            token: self.token,
            data,
        })
    }

    async fn read_upload(&self, max: usize) -> Result<Bytes, WireError> {
        let (reply, rx) = oneshot::channel();
        self.emit(Event::Read {
            token: self.token,
            max,
            reply,
        })?;
        rx.await.map_err(|_| WireError::Detached)
    }

    fn done(&self, outcome: Outcome) {
        let _ = self.events.send(Event::Done {
            token: self.token,
            code: outcome.code,
            detail: outcome.detail,
            connection: outcome.connection,
        });
        self.signal.notify_one();
    }
}

/// Everything an exchange needs, resolved from the handle at admission.
#[derive(Debug, Clone)]
pub(crate) struct Plan {
    pub origin: String,
    host: String,
    port: u16,
    head: Vec<u8>,
    pub upload_size: Option<u64>,
    no_body: bool,
    request_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl Plan {
    pub fn from_options(options: &TransferOptions) -> Result<Self, EngineError> {
        let url = Url::parse(&options.url).map_err(|e| {
            EngineError::new(EngineCode::UrlMalformed, format!("{:?}: {}", options.url, e))
        })?;
        if url.scheme() != "http" {
            return Err(EngineError::new(
                EngineCode::UnsupportedProtocol,
                format!("scheme {:?} is not supported", url.scheme()),
            ));
        }
        let host = match url.host() {
            Some(Host::Domain(d)) => d.to_string(),
            Some(Host::Ipv4(a)) => a.to_string(),
            Some(Host::Ipv6(a)) => a.to_string(),
            None => {
                return Err(EngineError::new(EngineCode::UrlMalformed, "URL has no host"));
            }
        };
        let port = url.port_or_known_default().unwrap_or(80);
        let method_ok = !options.method.is_empty()
            && options
                .method
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !method_ok {
            return Err(EngineError::new(
                EngineCode::BadOption,
                format!("invalid method {:?}", options.method),
            ));
        }

        let head = build_request_head(options, &url);
        Ok(Self {
            origin: format!("{}:{}", host, port),
            host,
            port,
            head,
            upload_size: options.upload_size,
            no_body: options.no_body,
            request_timeout: options.request_timeout,
            connect_timeout: options.connect_timeout,
        })
    }
}

/// Serializes the request line and headers.
pub(crate) fn build_request_head(options: &TransferOptions, url: &Url) -> Vec<u8> {
    let mut buffer = Vec::new();

    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    buffer.extend_from_slice(format!("{} {} HTTP/1.1\r\n", options.method, target).as_bytes());

    let has = |name: &str| {
        options.headers.iter().any(|h| {
            h.split_once(':')
                .is_some_and(|(k, _)| k.trim().eq_ignore_ascii_case(name))
        })
    };

    if !has("host") {
        if let Some(host) = url.host_str() {
            match url.port() {
                Some(port) => {
                    buffer.extend_from_slice(format!("Host: {}:{}\r\n", host, port).as_bytes())
                }
                None => buffer.extend_from_slice(format!("Host: {}\r\n", host).as_bytes()),
            }
        }
    }
    if !options.user_agent.is_empty() && !has("user-agent") {
        buffer.extend_from_slice(format!("User-Agent: {}\r\n", options.user_agent).as_bytes());
    }
    // The engine does not decode content codings.
    if options.accept_encoding && !has("accept-encoding") {
        buffer.extend_from_slice(b"Accept-Encoding: identity\r\n");
    }
    if let Some(size) = options.upload_size {
        if !has("content-length") {
            buffer.extend_from_slice(format!("Content-Length: {}\r\n", size).as_bytes());
        }
    }
    for header in &options.headers {
        buffer.extend_from_slice(header.as_bytes());
        buffer.extend_from_slice(b"\r\n");
    }
    buffer.extend_from_slice(b"\r\n");
    buffer
}

#[derive(Debug)]
pub(crate) struct Outcome {
    code: EngineCode,
    detail: String,
    connection: Option<Connection>,
}

impl Outcome {
    fn ok(connection: Option<Connection>) -> Self {
        Self {
            code: EngineCode::Ok,
            detail: String::new(),
            connection,
        }
    }

    fn failed(code: EngineCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
            connection: None,
        }
    }
}

#[derive(Debug)]
enum WireError {
    Io(io::Error),
    Closed,
    Framing(String),
    /// The read callback ran dry before the declared upload size.
    UploadShort(String),
    /// The engine dropped this transfer.
    Detached,
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        WireError::Io(e)
    }
}

/// Runs the whole exchange and reports the outcome to the engine.
pub(crate) async fn run(plan: Plan, pooled: Option<Connection>, channel: Channel) {
    let outcome = match plan.request_timeout {
        Some(limit) => match timeout(limit, exchange(&plan, pooled, &channel)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::failed(
                EngineCode::TimedOut,
                format!("request exceeded {} ms", limit.as_millis()),
            ),
        },
        None => exchange(&plan, pooled, &channel).await,
    };
    channel.done(outcome);
}

enum Attempt {
    Finished(Outcome),
    /// A pooled connection closed before replying.
    Stale,
}

async fn exchange(plan: &Plan, pooled: Option<Connection>, channel: &Channel) -> Outcome {
    if let Some(connection) = pooled {
        match attempt(plan, connection, channel, true).await {
            Attempt::Finished(outcome) => return outcome,
            Attempt::Stale => {
                tracing::debug!(
                    token = %channel.token,
                    origin = %plan.origin,
                    "Pooled connection was stale, reconnecting"
                );
            }
        }
    }

    let connection = match connect(plan).await {
        Ok(c) => c,
        Err(outcome) => return outcome,
    };
    match attempt(plan, connection, channel, false).await {
        Attempt::Finished(outcome) => outcome,
        Attempt::Stale => Outcome::failed(EngineCode::GotNothing, "empty reply from server"),
    }
}

async fn connect(plan: &Plan) -> Result<Connection, Outcome> {
    let establish = async {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((plan.host.as_str(), plan.port))
            .await
            .map_err(|e| {
                Outcome::failed(
                    EngineCode::CouldNotResolveHost,
                    format!("{}: {}", plan.host, e),
                )
            })?
            .collect();
        if addrs.is_empty() {
            return Err(Outcome::failed(EngineCode::CouldNotResolveHost, plan.host.clone()));
        }

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(Connection {
                        stream,
                        origin: plan.origin.clone(),
                    });
                }
                Err(e) => last_error = Some(format!("{}: {}", addr, e)),
            }
        }
        Err(Outcome::failed(EngineCode::CouldNotConnect, last_error.unwrap_or_default()))
    };

    match plan.connect_timeout {
        Some(limit) => timeout(limit, establish).await.unwrap_or_else(|_| {
            Err(Outcome::failed(
                EngineCode::TimedOut,
                format!(
                    "connection to {} timed out after {} ms",
                    plan.origin,
                    limit.as_millis()
                ),
            ))
        }),
        None => establish.await,
    }
}

async fn attempt(plan: &Plan, connection: Connection, channel: &Channel, pooled: bool) -> Attempt {
    let mut wire = Wire {
        connection,
        buf: BytesMut::with_capacity(READ_CHUNK),
        received: false,
    };

    if let Err(e) = send_request(plan, &mut wire, channel).await {
        return match e {
            WireError::Io(_) | WireError::Closed if pooled => Attempt::Stale,
            WireError::Io(e) => {
                Attempt::Finished(Outcome::failed(EngineCode::SendError, e.to_string()))
            }
            other => Attempt::Finished(wire_failure(other, EngineCode::SendError)),
        };
    }

    match receive_response(plan, &mut wire, channel).await {
        Ok(reusable) => {
            let connection = (reusable && wire.buf.is_empty()).then_some(wire.connection);
            Attempt::Finished(Outcome::ok(connection))
        }
        Err(WireError::Closed) | Err(WireError::Io(_)) if pooled && !wire.received => {
            Attempt::Stale
        }
        Err(WireError::Closed) if !wire.received => {
            Attempt::Finished(Outcome::failed(EngineCode::GotNothing, "empty reply from server"))
        }
        Err(e) => Attempt::Finished(wire_failure(e, EngineCode::RecvError)),
    }
}

fn wire_failure(error: WireError, io_code: EngineCode) -> Outcome {
    match error {
        WireError::Io(e) => Outcome::failed(io_code, e.to_string()),
        WireError::Closed => Outcome::failed(
            EngineCode::PartialBody,
            "connection closed before the response was complete",
        ),
        WireError::Framing(detail) => Outcome::failed(EngineCode::Framing, detail),
        WireError::UploadShort(detail) => Outcome::failed(EngineCode::ReadAborted, detail),
        WireError::Detached => Outcome::failed(EngineCode::Aborted, "transfer was removed"),
    }
}

async fn send_request(plan: &Plan, wire: &mut Wire, channel: &Channel) -> Result<(), WireError> {
    wire.connection.stream.write_all(&plan.head).await?;

    if let Some(size) = plan.upload_size {
        let mut sent: u64 = 0;
        while sent < size {
            let max = (size - sent).min(UPLOAD_CHUNK_SIZE as u64) as usize;
            let chunk = channel.read_upload(max).await?;
            if chunk.is_empty() {
                return Err(WireError::UploadShort(format!(
                    "upload payload ended after {} of {} bytes",
                    sent, size
                )));
            }
            wire.connection.stream.write_all(&chunk).await?;
            sent += chunk.len() as u64;
        }
    }

    wire.connection.stream.flush().await?;
    Ok(())
}

/// Framing facts extracted from a response head.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ResponseHead {
    pub status: u16,
    pub content_length: Option<u64>,
    pub chunked: bool,
    pub close: bool,
}

/// Parses status line and framing headers. `head` excludes the final blank line.
pub(crate) fn parse_response_head(head: &[u8]) -> Result<(ResponseHead, Vec<&[u8]>), String> {
    let lines: Vec<&[u8]> = head
        .split(|b| *b == b'\n')
        .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
        .filter(|l| !l.is_empty())
        .collect();

    let status_line = lines.first().ok_or("empty response head")?;
    let status_text = String::from_utf8_lossy(status_line);
    let mut parts = status_text.split_ascii_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/1.") {
        return Err(format!("invalid status line {:?}", status_text));
    }
    let status = parts
        .next()
        .filter(|c| c.len() == 3)
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or_else(|| format!("invalid status line {:?}", status_text))?;

    let mut parsed = ResponseHead {
        status,
        close: version == "HTTP/1.0",
        ..ResponseHead::default()
    };
    for line in &lines[1..] {
        if line[0] == b' ' || line[0] == b'\t' {
            continue;
        }
        let Some(colon) = line.iter().position(|b| *b == b':') else {
            return Err(format!("malformed header line {:?}", String::from_utf8_lossy(line)));
        };
        let name = String::from_utf8_lossy(&line[..colon]);
        let value = String::from_utf8_lossy(&line[colon + 1..]);
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => {
                let length: u64 = value
                    .parse()
                    .map_err(|_| format!("invalid content-length {:?}", value))?;
                if parsed.content_length.is_some_and(|l| l != length) {
                    return Err("conflicting content-length headers".to_string());
                }
                parsed.content_length = Some(length);
            }
            "transfer-encoding" => {
                parsed.chunked = value
                    .rsplit(',')
                    .next()
                    .is_some_and(|c| c.trim().eq_ignore_ascii_case("chunked"));
            }
            "connection" => {
                for token in value.split(',').map(str::trim) {
                    if token.eq_ignore_ascii_case("close") {
                        parsed.close = true;
                    } else if token.eq_ignore_ascii_case("keep-alive") {
                        parsed.close = false;
                    }
                }
            }
            _ => {}
        }
    }
    Ok((parsed, lines))
}

/// Reads the response, forwarding header lines and body chunks.
/// Returns whether the connection may carry another request.
async fn receive_response(
    plan: &Plan,
    wire: &mut Wire,
    channel: &Channel,
) -> Result<bool, WireError> {
    let head = loop {
        let raw = wire.read_head().await?;
        let (head, lines) =
            parse_response_head(&raw[..raw.len() - 4]).map_err(WireError::Framing)?;
        for line in &lines {
            channel.header(line)?;
        }
        channel.header(b"")?;
        // Interim responses precede the real one.
        if (100..200).contains(&head.status) && head.status != 101 {
            continue;
        }
        break head;
    };

    let bodyless = plan.no_body || head.status == 204 || head.status == 304;
    if bodyless {
        return Ok(!head.close);
    }
    if head.chunked {
        wire.stream_chunked(channel).await?;
        return Ok(!head.close);
    }
    if let Some(length) = head.content_length {
        wire.stream_exact(length, channel).await?;
        return Ok(!head.close);
    }
    wire.stream_until_close(channel).await?;
    Ok(false)
}

struct Wire {
    connection: Connection,
    buf: BytesMut,
    received: bool,
}

impl Wire {
    async fn fill(&mut self) -> Result<usize, WireError> {
        self.buf.reserve(READ_CHUNK);
        let n = self.connection.stream.read_buf(&mut self.buf).await?;
        if n > 0 {
            self.received = true;
        }
        Ok(n)
    }

    async fn read_head(&mut self) -> Result<BytesMut, WireError> {
        loop {
            if let Some(end) = self.buf.windows(4).position(|w| w == b"\r\n\r\n") {
                return Ok(self.buf.split_to(end + 4));
            }
            if self.buf.len() > MAX_HEAD_SIZE {
                return Err(WireError::Framing("response headers too large".to_string()));
            }
            if self.fill().await? == 0 {
                return Err(WireError::Closed);
            }
        }
    }

    async fn read_line(&mut self) -> Result<BytesMut, WireError> {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(pos - 1);
                }
                return Ok(line);
            }
            if self.buf.len() > MAX_LINE_SIZE {
                return Err(WireError::Framing("line too long".to_string()));
            }
            if self.fill().await? == 0 {
                return Err(WireError::Closed);
            }
        }
    }

    async fn stream_exact(
        &mut self,
        mut remaining: u64,
        channel: &Channel,
    ) -> Result<(), WireError> {
        while remaining > 0 {
            if self.buf.is_empty() && self.fill().await? == 0 {
                return Err(WireError::Closed);
            }
            let n = (self.buf.len() as u64).min(remaining) as usize;
            channel.body(self.buf.split_to(n).freeze())?;
            remaining -= n as u64;
        }
        Ok(())
    }

    async fn stream_chunked(&mut self, channel: &Channel) -> Result<(), WireError> {
        loop {
            let line = self.read_line().await?;
            let text = String::from_utf8_lossy(&line);
            let size_text = text.split(';').next().unwrap_or_default().trim();
            let size = u64::from_str_radix(size_text, 16)
                .map_err(|_| WireError::Framing(format!("invalid chunk size {:?}", size_text)))?;
            if size == 0 {
                // Trailer section ends with an empty line.
                while !self.read_line().await?.is_empty() {}
                return Ok(());
            }
            self.stream_exact(size, channel).await?;
            if !self.read_line().await?.is_empty() {
                return Err(WireError::Framing("missing CRLF after chunk".to_string()));
            }
        }
    }

    async fn stream_until_close(&mut self, channel: &Channel) -> Result<(), WireError> {
        loop {
            if !self.buf.is_empty() {
                channel.body(self.buf.split().freeze())?;
            }
            if self.fill().await? == 0 {
                return Ok(());
            }
        }
    }
}
