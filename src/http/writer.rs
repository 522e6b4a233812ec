use bytes::{Bytes, BytesMut};

use crate::http::head::find_header;
use crate::http::request::Request;
use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

fn put_headers<'a>(
    buf: &mut BytesMut,
    headers: impl Iterator<Item = (&'a String, &'a String)>,
) {
    for (k, v) in headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

/// Serializes the request line and headers, including the blank line.
///
/// `Content-Length` is added for a non-empty body and `Connection: close`
/// when the connection does not persist, unless already present.
pub fn serialize_request_head(req: &Request, persistent: bool) -> Bytes {
    let mut buf = BytesMut::new();

    // Request line
    let request_line = format!("{} {} {}\r\n", req.method, req.path, req.version);
    buf.extend_from_slice(request_line.as_bytes());

    put_headers(&mut buf, req.headers.iter());

    if !req.body.is_empty() && find_header(&req.headers, "Content-Length").is_none() {
        buf.extend_from_slice(format!("Content-Length: {}\r\n", req.body.len()).as_bytes());
    }

    if !persistent && find_header(&req.headers, "Connection").is_none() {
        buf.extend_from_slice(b"Connection: close\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");
    buf.freeze()
}

/// Serializes the status line and headers, including the blank line.
///
/// `Content-Length` is always written so the peer can frame the body.
pub fn serialize_response_head(resp: &Response, persistent: bool) -> Bytes {
    let mut buf = BytesMut::new();

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    put_headers(&mut buf, resp.headers.iter());

    if find_header(&resp.headers, "Content-Length").is_none() {
        buf.extend_from_slice(format!("Content-Length: {}\r\n", resp.body.len()).as_bytes());
    }

    if !persistent && find_header(&resp.headers, "Connection").is_none() {
        buf.extend_from_slice(b"Connection: close\r\n");
    }

    buf.extend_from_slice(b"\r\n");
    buf.freeze()
}
