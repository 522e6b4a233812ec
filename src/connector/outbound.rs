//! Outbound direction of a connection: moves a message into the outbound
//! buffer piece by piece and drains the buffer to the transport.

use bytes::{Buf, Bytes};
use tracing::debug;

use crate::connector::Side;
use crate::error::Result;
use crate::http::writer::{serialize_request_head, serialize_response_head};
use crate::http::{Exchange, Method, Response};
use crate::io::{Buffer, BufferProcessor, Transfer, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Idle,
    Head,
    Body,
    End,
}

/// Serializer of the message currently being written.
pub struct MessageWriter {
    side: Side,
    tracing: bool,
    state: WriteState,
    head: Bytes,
    body: Bytes,
    current: Option<Exchange>,
}

impl MessageWriter {
    pub fn new(side: Side, tracing: bool) -> Self {
        Self {
            side,
            tracing,
            state: WriteState::Idle,
            head: Bytes::new(),
            body: Bytes::new(),
            current: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == WriteState::Idle
    }

    /// Indicates if the message was entirely handed to the transport.
    pub fn is_done(&self, buffer: &Buffer) -> bool {
        self.state == WriteState::End && buffer.is_empty()
    }

    fn has_more(&self) -> bool {
        matches!(self.state, WriteState::Head | WriteState::Body)
    }

    /// Begins writing the message of `exchange`: the response on the server
    /// side, the request on the client side.
    ///
    /// A response to HEAD keeps its headers, `Content-Length` included, but
    /// its body is never written.
    pub fn start(&mut self, mut exchange: Exchange, persistent: bool) {
        let (head, body) = match self.side {
            Side::Server => {
                let bodiless = exchange.request.method == Method::HEAD;
                let response = exchange.response.get_or_insert_with(Response::internal_error);
                let body = if bodiless {
                    Bytes::new()
                } else {
                    response.body.clone()
                };
                (serialize_response_head(response, persistent), body)
            }
            Side::Client => (
                serialize_request_head(&exchange.request, persistent),
                exchange.request.body.clone(),
            ),
        };

        if self.tracing {
            for line in String::from_utf8_lossy(&head).split("\r\n").filter(|l| !l.is_empty()) {
                debug!(target: "conduit::wire", side = %self.side, ">> {}", line);
            }
        }

        self.head = head;
        self.body = body;
        self.state = WriteState::Head;
        self.current = Some(exchange);
    }

    /// Copies as much of the message as fits into `buffer`.
    fn fill(&mut self, buffer: &mut Buffer) -> usize {
        let mut filled = 0;

        while buffer.can_fill() && self.has_more() {
            let source = match self.state {
                WriteState::Head => &mut self.head,
                _ => &mut self.body,
            };

            let n = buffer.fill(source);
            source.advance(n);
            filled += n;

            if source.is_empty() {
                self.state = match self.state {
                    WriteState::Head => WriteState::Body,
                    _ => WriteState::End,
                };
            }
        }

        filled
    }

    /// Ends the current message, returning its exchange.
    pub fn finish(&mut self) -> Option<Exchange> {
        self.state = WriteState::Idle;
        self.head.clear();
        self.body.clear();
        self.current.take()
    }

    /// Abandons the current message, returning its exchange.
    pub fn abort(&mut self) -> Option<Exchange> {
        self.finish()
    }
}

/// Feeds the outbound buffer from the writer and drains it to the transport.
pub(crate) struct OutboundProcessor<'a, T> {
    pub writer: &'a mut MessageWriter,
    pub transport: &'a mut T,
}

impl<T: Transport> BufferProcessor for OutboundProcessor<'_, T> {
    fn pre_process(&mut self, _buffer: &mut Buffer, _max_drained: usize) -> Result<usize> {
        if self.transport.is_negotiated() {
            Ok(0)
        } else {
            Ok(self.transport.negotiate()?)
        }
    }

    fn can_loop(&self, buffer: &Buffer) -> bool {
        self.transport.is_negotiated() && !self.writer.is_idle() && !self.writer.is_done(buffer)
    }

    fn could_fill(&self, _buffer: &Buffer) -> bool {
        self.writer.has_more()
    }

    fn on_fill(&mut self, buffer: &mut Buffer) -> Result<Transfer> {
        Ok(Transfer::Bytes(self.writer.fill(buffer)))
    }

    fn on_drain(&mut self, buffer: &mut Buffer, _max_drained: usize) -> Result<usize> {
        Ok(buffer.drain_into(&mut *self.transport)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;

    fn drain_all(writer: &mut MessageWriter, buffer: &mut Buffer) -> Vec<u8> {
        let mut written = Vec::new();
        while !writer.is_done(buffer) {
            writer.fill(buffer);
            buffer.flip();
            written.extend_from_slice(buffer.pending());
            let n = buffer.pending().len();
            buffer.consume(n);
            buffer.flip();
        }
        written
    }

    #[test]
    fn message_larger_than_buffer_fills_in_pieces() {
        let request = Request::to(crate::http::Method::POST, "http://localhost/upload")
            .unwrap();
        let mut exchange = Exchange::new(request);
        exchange.request.body = Bytes::from(vec![b'x'; 100]);

        let mut writer = MessageWriter::new(Side::Client, false);
        writer.start(exchange, true);

        let mut buffer = Buffer::new(16);
        let written = drain_all(&mut writer, &mut buffer);

        let text = String::from_utf8(written).unwrap();
        assert!(text.starts_with("POST /upload HTTP/1.1\r\n"));
        assert!(text.contains("Content-Length: 100\r\n"));
        assert!(text.ends_with(&"x".repeat(100)));
        assert!(writer.finish().is_some());
    }

    #[test]
    fn head_response_is_written_without_body() {
        let request = Request::to(Method::HEAD, "http://localhost/page").unwrap();
        let mut exchange = Exchange::inbound(request, 1, 0);
        exchange.set_response(Response::ok("hello"));

        let mut writer = MessageWriter::new(Side::Server, false);
        writer.start(exchange, true);

        let mut buffer = Buffer::new(64);
        let text = String::from_utf8(drain_all(&mut writer, &mut buffer)).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
