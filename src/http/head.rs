//! Parsing of message head lines.
//!
//! Lines arrive one at a time from [`Buffer::drain_line`](crate::io::Buffer::drain_line),
//! already stripped of their CRLF terminator.

use std::collections::HashMap;

use thiserror::Error;

use crate::http::request::Method;
use crate::http::response::StatusCode;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid request line")]
    InvalidRequest,
    #[error("unsupported method")]
    InvalidMethod,
    #[error("invalid header line")]
    InvalidHeader,
    #[error("invalid Content-Length value")]
    InvalidContentLength,
    #[error("invalid status line")]
    InvalidStatusLine,
    #[error("invalid request target")]
    InvalidTarget,
    #[error("head line too long")]
    LineTooLong,
    #[error("message body too large")]
    BodyTooLarge,
}

/// Parsed request line: method, path and version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub path: String,
    pub version: String,
}

/// Parsed status line: version and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub status: StatusCode,
}

pub fn parse_request_line(line: &str) -> Result<RequestLine, ParseError> {
    let mut parts = line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if parts.next().is_some() || !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    Ok(RequestLine {
        method,
        path: path.to_string(),
        version: version.to_string(),
    })
}

/// Parses `HTTP/1.1 200 OK`. The reason phrase is optional and ignored.
pub fn parse_status_line(line: &str) -> Result<StatusLine, ParseError> {
    let mut parts = line.splitn(3, ' ');

    let version = parts.next().ok_or(ParseError::InvalidStatusLine)?;
    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidStatusLine);
    }

    let code = parts
        .next()
        .and_then(|c| c.parse::<u16>().ok())
        .ok_or(ParseError::InvalidStatusLine)?;

    Ok(StatusLine {
        version: version.to_string(),
        status: StatusCode::from_u16(code),
    })
}

pub fn parse_header_line(line: &str) -> Result<(String, String), ParseError> {
    let (key, value) = line.split_once(':').ok_or(ParseError::InvalidHeader)?;

    let key = key.trim();
    if key.is_empty() {
        return Err(ParseError::InvalidHeader);
    }

    Ok((key.to_string(), value.trim().to_string()))
}

/// Looks a header up by name, ignoring ASCII case.
pub fn find_header<'a>(headers: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Reads the Content-Length header. `Ok(None)` when absent.
pub fn content_length(headers: &HashMap<String, String>) -> Result<Option<usize>, ParseError> {
    find_header(headers, "Content-Length")
        .map(|v| v.parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
        .transpose()
}
