//! Tests for header parsing and request building

use std::time::Duration;

use courier::http::header::{
    append_header_data, try_parse_bool_header, try_parse_content_range_header, validate_http_header,
};
use courier::{ErrorCode, HeaderMap, HttpRequest, HttpRequestBuilder, HttpResponse};

fn headers_from(lines: &[&[u8]]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for line in lines {
        assert_eq!(append_header_data(&mut headers, line), line.len());
    }
    headers
}

#[test]
fn test_repeated_headers_are_kept_in_order() {
    let headers = headers_from(&[
        b"Set-Cookie: a=1\r\n",
        b"Set-Cookie: b=2\r\n",
        b"ETag: \"x\"\r\n",
    ]);

    assert_eq!(headers.len(), 3);
    assert_eq!(headers.get("set-cookie"), Some("a=1"));
    assert_eq!(headers.get_all("SET-COOKIE").collect::<Vec<_>>(), vec!["a=1", "b=2"]);
    assert_eq!(headers.get("etag"), Some("\"x\""));
}

#[test]
fn test_folded_header_continues_previous_value() {
    let headers = headers_from(&[b"X-Long: first\r\n", b"   second\r\n", b"\tthird\r\n"]);
    assert_eq!(headers.get("x-long"), Some("first second third"));
}

#[test]
fn test_continuation_without_header_is_ignored() {
    let headers = headers_from(&[b"  orphan\r\n"]);
    assert!(headers.is_empty());
}

#[test]
fn test_malformed_lines_are_consumed_and_ignored() {
    let headers = headers_from(&[
        b"no colon here\r\n",
        b"bad name: x\r\n",
        b"HTTP/1.1 200 OK",
        b"\r\n",
        b"",
    ]);
    assert!(headers.is_empty());
}

#[test]
fn test_empty_header_value() {
    let headers = headers_from(&[b"X-Empty:\r\n"]);
    assert!(headers.contains("x-empty"));
    assert_eq!(headers.get("x-empty"), Some(""));
}

#[test]
fn test_validate_http_header() {
    assert!(validate_http_header("Content-Type: text/plain").is_ok());
    assert!(validate_http_header("x-empty:").is_ok());

    let err = validate_http_header("Bad Header: 1").unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
    assert!(validate_http_header(": no name").is_err());
    assert!(validate_http_header("X-Split: a\r\nX-Injected: b").is_err());
}

#[test]
fn test_content_range_parsing() {
    let response = HttpResponse::new(206, "").with_header("Content-Range", "bytes 0-99/1000");
    assert_eq!(response.content_range(), Some((0, 99, 1000)));

    let unknown = headers_from(&[b"Content-Range: bytes 5-9/*\r\n"]);
    assert_eq!(try_parse_content_range_header(&unknown), Some((5, 9, 0)));

    let malformed = headers_from(&[b"Content-Range: items 1-2/3\r\n"]);
    assert_eq!(try_parse_content_range_header(&malformed), None);
    assert_eq!(try_parse_content_range_header(&HeaderMap::new()), None);
}

#[test]
fn test_bool_header_parsing() {
    let headers = headers_from(&[b"X-Yes: TRUE\r\n", b"X-No: 0\r\n", b"X-Odd: maybe\r\n"]);
    assert_eq!(try_parse_bool_header(&headers, "x-yes"), Some(true));
    assert_eq!(try_parse_bool_header(&headers, "x-no"), Some(false));
    assert_eq!(try_parse_bool_header(&headers, "x-odd"), None);
    assert_eq!(try_parse_bool_header(&headers, "x-missing"), None);
}

#[test]
fn test_response_is_success() {
    assert!(HttpResponse::new(204, "").is_success());
    assert!(!HttpResponse::new(304, "").is_success());
    assert!(!HttpResponse::default().is_success());
}

#[test]
fn test_effective_method() {
    let plain = HttpRequest::get("http://example.com/");
    assert_eq!(plain.effective_method(false), "GET");
    assert_eq!(plain.effective_method(true), "POST");

    let delete = HttpRequestBuilder::new("DELETE", "http://example.com/")
        .build()
        .unwrap();
    assert_eq!(delete.effective_method(false), "DELETE");
    assert_eq!(delete.effective_method(true), "DELETE");
}

#[test]
fn test_builder_adds_query_and_headers() {
    let request = HttpRequestBuilder::new("GET", "http://example.com/o")
        .add_query_parameter("alt", "media")
        .add_query_parameter("name", "a b")
        .add_range_header(0, Some(100))
        .add_range_header(50, None)
        .add_cache_control_max_age_header(Duration::from_secs(60))
        .add_cache_control_max_age_header(Duration::ZERO)
        .accept_encoding(true)
        .user_agent("agent/2")
        .build()
        .unwrap();

    assert_eq!(request.url, "http://example.com/o?alt=media&name=a+b");
    assert_eq!(
        request.headers,
        vec![
            "Range: bytes=0-99".to_string(),
            "Range: bytes=50-".to_string(),
            "Cache-Control: max-age=60".to_string(),
            "Cache-Control: no-cache".to_string(),
        ]
    );
    assert!(request.accept_encoding);
    assert_eq!(request.user_agent, "agent/2");
}

#[test]
fn test_empty_range_is_skipped() {
    let request = HttpRequestBuilder::new("GET", "http://example.com/")
        .add_range_header(10, Some(10))
        .build()
        .unwrap();
    assert!(request.headers.is_empty());
}

#[test]
fn test_builder_rejects_bad_input() {
    let err = HttpRequestBuilder::new("GET", "not a url").build().unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);

    let err = HttpRequestBuilder::new("GET", "http://example.com/")
        .add_header("missing colon")
        .build()
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidArgument);
}

#[test]
fn test_empty_method_means_default() {
    let request = HttpRequestBuilder::new("", "http://example.com/")
        .build()
        .unwrap();
    assert_eq!(request.method, None);
}

#[test]
fn test_iter_yields_entries_in_arrival_order() {
    let headers = headers_from(&[b"B: 2\r\n", b"A: 1\r\n", b"b: 3\r\n"]);
    let entries: Vec<(&str, &str)> = headers.iter().collect();
    assert_eq!(entries, vec![("b", "2"), ("a", "1"), ("b", "3")]);
}
