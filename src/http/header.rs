//! Header storage and header-line parsing.
//!
//! Response headers are kept in a [`HeaderMap`], an append-only multimap:
//! names are lowercased, insertion order is preserved and a repeated name
//! adds another entry instead of replacing the first one.

use crate::error::TransportError;

/// Append-only, insertion-ordered header multimap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header. The name is stored lowercased; existing entries
    /// with the same name are left untouched.
    pub fn append(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// Returns the first value recorded for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value recorded for `name`, in arrival order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Every `(name, value)` pair in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Extends the most recent value with a folded continuation.
    /// Returns false if there is no header to continue.
    fn continue_last(&mut self, continuation: &str) -> bool {
        match self.entries.last_mut() {
            Some((_, value)) => {
                if !continuation.is_empty() {
                    if !value.is_empty() {
                        value.push(' ');
                    }
                    value.push_str(continuation);
                }
                true
            }
            None => false,
        }
    }
}

// RFC 7230 token characters.
fn is_tchar(ch: u8) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}

fn is_ows(ch: u8) -> bool {
    ch == b' ' || ch == b'\t'
}

fn trim_ows(mut data: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = data {
        if !is_ows(*first) {
            break;
        }
        data = rest;
    }
    while let [rest @ .., last] = data {
        if !is_ows(*last) {
            break;
        }
        data = rest;
    }
    data
}

/// Validates a request header line of the form `name: value`.
pub fn validate_http_header(header: &str) -> Result<(), TransportError> {
    let bytes = header.as_bytes();
    let name_len = bytes.iter().take_while(|b| is_tchar(**b)).count();
    let valid = name_len > 0
        && bytes.get(name_len) == Some(&b':')
        && bytes[name_len + 1..]
            .iter()
            .all(|b| *b == b'\t' || (0x20..=0x7e).contains(b) || *b >= 0x80);
    if valid {
        Ok(())
    } else {
        Err(TransportError::invalid_argument(format!(
            "Invalid HTTP header: {header:?}"
        )))
    }
}

/// Parses one raw header line as delivered by a transfer engine and appends
/// it to `headers`.
///
/// Lines must end in CRLF. Malformed lines are ignored, never rejected: the
/// return value is always `data.len()` so the engine treats the line as
/// consumed. A line starting with whitespace is a folded continuation of the
/// previous header.
pub fn append_header_data(headers: &mut HeaderMap, data: &[u8]) -> usize {
    let size = data.len();
    if size <= 2 || !data.ends_with(b"\r\n") {
        return size;
    }
    let line = &data[..size - 2];

    if is_ows(line[0]) {
        let continuation = String::from_utf8_lossy(trim_ows(line));
        headers.continue_last(&continuation);
        return size;
    }

    let name_len = line.iter().take_while(|b| is_tchar(**b)).count();
    if name_len == 0 || line.get(name_len) != Some(&b':') {
        return size;
    }

    let name = String::from_utf8_lossy(&line[..name_len]);
    let value = String::from_utf8_lossy(trim_ows(&line[name_len + 1..]));
    headers.append(name, value.into_owned());
    size
}

/// Parses `content-range: bytes <start>-<end>/<total>`.
///
/// Returns `(start, end, total)`; `total` is 0 when the server sent `*` or
/// omitted it.
pub fn try_parse_content_range_header(headers: &HeaderMap) -> Option<(u64, u64, u64)> {
    let value = headers.get("content-range")?;
    let range = value.strip_prefix("bytes ")?;
    let (span, total) = match range.split_once('/') {
        Some((span, "*")) => (span, None),
        Some((span, total)) => (span, Some(total)),
        None => (range, None),
    };
    let (start, end) = span.split_once('-')?;
    let start = parse_digits(start)?;
    let end = parse_digits(end)?;
    let total = match total {
        Some(t) => parse_digits(t)?,
        None => 0,
    };
    Some((start, end, total))
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Parses a boolean-valued header (`true`/`false`/`1`/`0`/`yes`/`no`).
pub fn try_parse_bool_header(headers: &HeaderMap, name: &str) -> Option<bool> {
    let value = headers.get(name)?.trim();
    if ["true", "t", "yes", "y", "1"]
        .iter()
        .any(|v| value.eq_ignore_ascii_case(v))
    {
        Some(true)
    } else if ["false", "f", "no", "n", "0"]
        .iter()
        .any(|v| value.eq_ignore_ascii_case(v))
    {
        Some(false)
    } else {
        None
    }
}
