//! HTTP message model.
//!
//! The connector moves HTTP/1.1 messages without interpreting them beyond
//! framing: a head made of CRLF-terminated lines, then a body delimited by
//! `Content-Length` (or, for responses without one, by the end of the
//! connection).
//!
//! - **`request`** / **`response`**: message representations with builders
//! - **`head`**: parses start lines and header lines
//! - **`writer`**: serializes message heads
//! - **`exchange`**: a request paired with its response and completion callback
//!
//! # Exchange flow
//!
//! ```text
//!   server side                          client side
//!   ───────────                          ───────────
//!   read request ─► inbound queue        send(request) ─► outbound queue
//!        │                                    │
//!   handler sets response                write request, await response
//!        │                                    │
//!   outbound queue ─► write response     read response ─► inbound queue ─► reply
//! ```

pub mod exchange;
pub mod head;
pub mod request;
pub mod response;
pub mod writer;

pub use exchange::Exchange;
pub use request::{Method, Request, RequestBuilder};
pub use response::{Response, ResponseBuilder, StatusCode};
