use bytes::Bytes;
use conduit::http::head::{
    content_length, parse_header_line, parse_request_line, parse_status_line, ParseError,
};
use conduit::http::request::{Method, Request};
use conduit::http::response::{ResponseBuilder, StatusCode};
use conduit::http::writer::{serialize_request_head, serialize_response_head};
use std::collections::HashMap;

#[test]
fn test_parse_request_line() {
    let line = parse_request_line("POST /api HTTP/1.1").unwrap();

    assert_eq!(line.method, Method::POST);
    assert_eq!(line.path, "/api");
    assert_eq!(line.version, "HTTP/1.1");
}

#[test]
fn test_parse_request_with_path_and_query_string() {
    let line = parse_request_line("GET /search?q=rust HTTP/1.1").unwrap();
    assert_eq!(line.path, "/search?q=rust");
}

#[test]
fn test_parse_various_http_methods() {
    let methods = vec![
        ("GET", Method::GET),
        ("POST", Method::POST),
        ("PUT", Method::PUT),
        ("DELETE", Method::DELETE),
        ("HEAD", Method::HEAD),
        ("OPTIONS", Method::OPTIONS),
        ("PATCH", Method::PATCH),
    ];

    for (method_str, expected_method) in methods {
        let line = parse_request_line(&format!("{} / HTTP/1.1", method_str)).unwrap();
        assert_eq!(line.method, expected_method);
    }
}

#[test]
fn test_parse_invalid_request_lines() {
    assert_eq!(
        parse_request_line("INVALID / HTTP/1.1").unwrap_err(),
        ParseError::InvalidMethod
    );
    assert_eq!(parse_request_line("GET /").unwrap_err(), ParseError::InvalidRequest);
    assert_eq!(
        parse_request_line("GET / FTP/1.0").unwrap_err(),
        ParseError::InvalidRequest
    );
}

#[test]
fn test_parse_status_line() {
    let line = parse_status_line("HTTP/1.1 404 Not Found").unwrap();
    assert_eq!(line.version, "HTTP/1.1");
    assert_eq!(line.status, StatusCode::NotFound);

    assert_eq!(
        parse_status_line("HTTP/1.1 OK").unwrap_err(),
        ParseError::InvalidStatusLine
    );
    assert_eq!(
        parse_status_line("200 OK").unwrap_err(),
        ParseError::InvalidStatusLine
    );
}

#[test]
fn test_parse_header_line() {
    assert_eq!(
        parse_header_line("Host:  example.com ").unwrap(),
        ("Host".to_string(), "example.com".to_string())
    );
    assert_eq!(
        parse_header_line("BrokenHeader").unwrap_err(),
        ParseError::InvalidHeader
    );
    assert_eq!(parse_header_line(": value").unwrap_err(), ParseError::InvalidHeader);
}

#[test]
fn test_content_length_header() {
    let mut headers = HashMap::new();
    assert_eq!(content_length(&headers), Ok(None));

    headers.insert("content-length".to_string(), "12".to_string());
    assert_eq!(content_length(&headers), Ok(Some(12)));

    headers.insert("content-length".to_string(), "twelve".to_string());
    assert_eq!(content_length(&headers), Err(ParseError::InvalidContentLength));
}

#[test]
fn test_serialize_response_head() {
    let response = ResponseBuilder::new(StatusCode::Ok).body("hello").build();
    let head = serialize_response_head(&response, true);
    let text = std::str::from_utf8(&head).unwrap();

    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.contains("Content-Length: 5\r\n"));
    assert!(!text.contains("Connection"));
    assert!(text.ends_with("\r\n\r\n"));
}

#[test]
fn test_serialize_head_when_not_persistent() {
    let response = ResponseBuilder::new(StatusCode::NoContent).build();
    let head = serialize_response_head(&response, false);
    assert!(std::str::from_utf8(&head).unwrap().contains("Connection: close\r\n"));

    let mut request = Request::to(Method::PUT, "http://localhost/item").unwrap();
    request.body = Bytes::from_static(b"{}");
    let head = serialize_request_head(&request, false);
    let text = std::str::from_utf8(&head).unwrap();

    assert!(text.starts_with("PUT /item HTTP/1.1\r\n"));
    assert!(text.contains("Host: localhost\r\n"));
    assert!(text.contains("Content-Length: 2\r\n"));
    assert!(text.contains("Connection: close\r\n"));
}
