use std::collections::HashMap;

use bytes::Bytes;

use crate::http::head::find_header;

/// Status of a response.
///
/// Besides the standard codes, [`StatusCode::ConnectorCommunicationError`]
/// (1001) marks an exchange whose bytes could not be moved over the wire.
/// It is never written to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    Created,
    /// Success with nothing to send back, the body is always empty
    NoContent,
    /// The cached copy is still good, the body is always empty
    NotModified,
    BadRequest,
    NotFound,
    MethodNotAllowed,
    /// Also what the connector answers when a service panics
    InternalServerError,
    BadGateway,
    ServiceUnavailable,
    GatewayTimeout,
    /// 1001, local to the connector
    ConnectorCommunicationError,
    /// Any other code read from a peer
    Other(u16),
}

impl StatusCode {
    /// ```
    /// # use conduit::http::response::StatusCode;
    /// assert_eq!(StatusCode::GatewayTimeout.as_u16(), 504);
    /// assert_eq!(StatusCode::ConnectorCommunicationError.as_u16(), 1001);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::Created => 201,
            StatusCode::NoContent => 204,
            StatusCode::NotModified => 304,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::InternalServerError => 500,
            StatusCode::BadGateway => 502,
            StatusCode::ServiceUnavailable => 503,
            StatusCode::GatewayTimeout => 504,
            StatusCode::ConnectorCommunicationError => 1001,
            StatusCode::Other(code) => *code,
        }
    }

    pub fn from_u16(code: u16) -> Self {
        match code {
            200 => StatusCode::Ok,
            201 => StatusCode::Created,
            204 => StatusCode::NoContent,
            304 => StatusCode::NotModified,
            400 => StatusCode::BadRequest,
            404 => StatusCode::NotFound,
            405 => StatusCode::MethodNotAllowed,
            500 => StatusCode::InternalServerError,
            502 => StatusCode::BadGateway,
            503 => StatusCode::ServiceUnavailable,
            504 => StatusCode::GatewayTimeout,
            1001 => StatusCode::ConnectorCommunicationError,
            other => StatusCode::Other(other),
        }
    }

    /// Reason phrase written on the status line.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::Created => "Created",
            StatusCode::NoContent => "No Content",
            StatusCode::NotModified => "Not Modified",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
            StatusCode::GatewayTimeout => "Gateway Timeout",
            StatusCode::ConnectorCommunicationError => "Communication Error",
            StatusCode::Other(_) => "Unknown",
        }
    }

    /// Indicates if a response with this status never carries a body.
    pub fn forbids_body(&self) -> bool {
        let code = self.as_u16();
        (100..200).contains(&code) || code == 204 || code == 304
    }
}

/// A response with its body fully buffered.
///
/// On the server side a service builds it; on the client side the connector
/// fills it from the wire, or with a 1001 status when the exchange failed
/// before an answer arrived.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    /// Names as given, looked up ignoring case
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Fluent construction of a [`Response`].
///
/// ```
/// # use conduit::http::response::{ResponseBuilder, StatusCode};
/// let response = ResponseBuilder::new(StatusCode::Created)
///     .header("Location", "/items/7")
///     .build();
/// assert_eq!(response.header("content-length"), Some("0"));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: HashMap<String, String>,
    body: Bytes,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Finishes the response, declaring the body length unless a
    /// `Content-Length` header was set explicitly.
    pub fn build(mut self) -> Response {
        if find_header(&self.headers, "Content-Length").is_none() {
            self.headers
                .insert("Content-Length".to_string(), self.body.len().to_string());
        }

        Response {
            status: self.status,
            headers: self.headers,
            body: self.body,
        }
    }
}

impl Response {
    /// A 200 response carrying `body`.
    ///
    /// ```
    /// # use conduit::http::response::{Response, StatusCode};
    /// let response = Response::ok("hello");
    /// assert_eq!(response.status, StatusCode::Ok);
    /// assert_eq!(response.header("Content-Length"), Some("5"));
    /// ```
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::Ok).body(body).build()
    }

    pub fn not_found() -> Self {
        ResponseBuilder::new(StatusCode::NotFound)
            .body(&b"404 Not Found"[..])
            .build()
    }

    /// Answer of a service that panicked.
    pub fn internal_error() -> Self {
        ResponseBuilder::new(StatusCode::InternalServerError)
            .body(&b"500 Internal Server Error"[..])
            .build()
    }

    /// Creates the local response of an exchange that failed on the wire.
    ///
    /// `detail` becomes the body, so callers can tell a refused connection
    /// from a peer that hung up.
    ///
    /// ```
    /// # use conduit::http::response::Response;
    /// let response = Response::communication_error("Connection closed");
    /// assert_eq!(response.status.as_u16(), 1001);
    /// assert_eq!(&response.body[..], b"Connection closed");
    /// ```
    pub fn communication_error(detail: impl Into<String>) -> Self {
        ResponseBuilder::new(StatusCode::ConnectorCommunicationError)
            .body(detail.into())
            .build()
    }

    /// Retrieves a header value by name, ignoring ASCII case.
    pub fn header(&self, key: &str) -> Option<&str> {
        find_header(&self.headers, key)
    }
}
