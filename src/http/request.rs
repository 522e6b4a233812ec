use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use url::Url;

use crate::http::head::{find_header, ParseError};

/// Request methods the connector reads and writes.
///
/// The connector itself only treats [`Method::HEAD`] differently; every other
/// method is passed to the service untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// Fetch the target
    GET,
    /// Send data for the target to process
    POST,
    /// Store the body as the new state of the target
    PUT,
    /// Remove the target
    DELETE,
    /// Same as GET, but the response goes out with headers only. Its
    /// `Content-Length` still describes the body a GET would get.
    HEAD,
    /// Ask which methods the target supports
    OPTIONS,
    /// Apply a partial change to the target
    PATCH,
}

/// An HTTP request, either read from a peer (server side) or about to be
/// written to one (client side).
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Origin-form target, path plus query
    pub path: String,
    pub version: String,
    /// Names as received, looked up ignoring case
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Absolute target of a client request, used to pick the connection
    pub target: Option<Url>,
}

/// Fluent construction of a [`Request`]; method and path are mandatory.
#[derive(Default)]
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    version: Option<String>,
    headers: HashMap<String, String>,
    body: Bytes,
    target: Option<Url>,
}

impl Method {
    /// Matches a request-line token. Tokens are case-sensitive.
    ///
    /// ```
    /// # use conduit::http::request::Method;
    /// assert_eq!(Method::from_str("PUT"), Some(Method::PUT));
    /// assert_eq!(Method::from_str("put"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }

    /// Token written on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn target(mut self, target: Url) -> Self {
        self.target = Some(target);
        self
    }

    /// Finishes the request. The version defaults to `HTTP/1.1`.
    ///
    /// # Errors
    ///
    /// Fails when no method or no path was given.
    ///
    /// ```
    /// # use conduit::http::request::{Method, RequestBuilder};
    /// let request = RequestBuilder::new()
    ///     .method(Method::POST)
    ///     .path("/items")
    ///     .body("name=lamp")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(request.version, "HTTP/1.1");
    ///
    /// assert!(RequestBuilder::new().path("/items").build().is_err());
    /// ```
    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            path: self.path.ok_or("path missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: self.body,
            target: self.target,
        })
    }
}

impl Request {
    /// Creates a client request for an absolute `http` URL.
    ///
    /// The path (with query) and the `Host` header are derived from the URL.
    ///
    /// # Errors
    ///
    /// [`ParseError::InvalidTarget`] when `target` is not an absolute URL
    /// with a host.
    ///
    /// # Example
    ///
    /// ```
    /// # use conduit::http::request::{Method, Request};
    /// let request = Request::to(Method::GET, "http://localhost:8080/search?q=rust").unwrap();
    /// assert_eq!(request.path, "/search?q=rust");
    /// assert_eq!(request.header("host"), Some("localhost:8080"));
    ///
    /// assert!(Request::to(Method::GET, "/relative").is_err());
    /// ```
    pub fn to(method: Method, target: &str) -> Result<Self, ParseError> {
        let url = Url::parse(target).map_err(|_| ParseError::InvalidTarget)?;
        let host = url.host_str().ok_or(ParseError::InvalidTarget)?;

        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        let mut headers = HashMap::new();
        headers.insert("Host".to_string(), host_header);

        Ok(Request {
            method,
            path,
            version: "HTTP/1.1".to_string(),
            headers,
            body: Bytes::new(),
            target: Some(url),
        })
    }

    /// Retrieves a header value by name, ignoring ASCII case.
    pub fn header(&self, key: &str) -> Option<&str> {
        find_header(&self.headers, key)
    }

    /// Indicates if the peer wants the connection kept after this exchange:
    /// an explicit `Connection` header wins, otherwise only HTTP/1.0 closes.
    ///
    /// ```
    /// # use conduit::http::request::{Method, RequestBuilder};
    /// let old = RequestBuilder::new()
    ///     .method(Method::GET)
    ///     .path("/")
    ///     .version("HTTP/1.0")
    ///     .build()
    ///     .unwrap();
    /// assert!(!old.keep_alive());
    ///
    /// let closing = RequestBuilder::new()
    ///     .method(Method::GET)
    ///     .path("/")
    ///     .header("Connection", "close")
    ///     .build()
    ///     .unwrap();
    /// assert!(!closing.keep_alive());
    /// ```
    pub fn keep_alive(&self) -> bool {
        match self.header("Connection") {
            Some(v) if v.eq_ignore_ascii_case("close") => false,
            Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
            _ => self.version != "HTTP/1.0",
        }
    }

    /// Resolves the socket address of the request target, port 80 by default.
    pub fn target_addr(&self) -> Option<SocketAddr> {
        let url = self.target.as_ref()?;
        url.socket_addrs(|| Some(80)).ok()?.into_iter().next()
    }
}
