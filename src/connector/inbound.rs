//! Inbound direction of a connection: turns buffered bytes into messages.

use std::collections::{HashMap, VecDeque};
use std::mem;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::connector::Side;
use crate::error::Result;
use crate::http::head::{self, ParseError};
use crate::io::{Buffer, BufferProcessor, LineState, Transfer, Transport};

/// Longest start or header line accepted, terminator excluded.
pub const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Largest body accepted, declared or read until the connection ends.
pub const MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// A message read off the wire, head still unparsed.
#[derive(Debug)]
pub struct RawMessage {
    pub start_line: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    StartLine,
    Headers,
    Body { remaining: usize },
    UntilClose,
}

/// Incremental message parser fed from the inbound buffer.
#[derive(Debug)]
pub struct MessageReader {
    side: Side,
    tracing: bool,
    state: ReadState,
    line: String,
    line_state: LineState,
    start_line: String,
    headers: HashMap<String, String>,
    body: BytesMut,
    completed: Vec<RawMessage>,
    /// Client side: whether each awaited response answers a HEAD request
    head_requests: VecDeque<bool>,
}

impl MessageReader {
    pub fn new(side: Side, tracing: bool) -> Self {
        Self {
            side,
            tracing,
            state: ReadState::StartLine,
            line: String::new(),
            line_state: LineState::Idle,
            start_line: String::new(),
            headers: HashMap::new(),
            body: BytesMut::new(),
            completed: Vec::new(),
            head_requests: VecDeque::new(),
        }
    }

    /// Tells which awaited responses, oldest first, answer a HEAD request
    /// and so carry no body whatever their headers declare.
    pub fn set_head_requests(&mut self, heads: VecDeque<bool>) {
        self.head_requests = heads;
    }

    /// Indicates if no message is partially read.
    pub fn is_idle(&self) -> bool {
        self.state == ReadState::StartLine && self.line.is_empty()
    }

    /// Consumes ready bytes of `buffer`. Returns the number consumed.
    pub fn read(&mut self, buffer: &mut Buffer) -> Result<usize> {
        let start = buffer.position();

        while buffer.can_drain() {
            match self.state {
                ReadState::StartLine | ReadState::Headers => {
                    self.line_state = buffer.drain_line(&mut self.line, self.line_state)?;
                    if self.line.len() > MAX_LINE_LENGTH {
                        return Err(ParseError::LineTooLong.into());
                    }

                    if self.line_state != LineState::Complete {
                        break;
                    }

                    self.line_state = LineState::Idle;
                    let line = mem::take(&mut self.line);

                    if self.tracing {
                        debug!(target: "conduit::wire", side = %self.side, "<< {}", line);
                    }

                    self.on_line(line)?;
                }
                ReadState::Body { remaining } => {
                    let chunk = buffer.pending();
                    let n = remaining.min(chunk.len());
                    self.body.extend_from_slice(&chunk[..n]);
                    buffer.consume(n);

                    if n == remaining {
                        self.complete();
                    } else {
                        self.state = ReadState::Body {
                            remaining: remaining - n,
                        };
                    }
                }
                ReadState::UntilClose => {
                    let chunk = buffer.pending();
                    let n = chunk.len();
                    if self.body.len() + n > MAX_BODY_SIZE {
                        return Err(ParseError::BodyTooLarge.into());
                    }
                    self.body.extend_from_slice(chunk);
                    buffer.consume(n);
                }
            }
        }

        Ok(buffer.position() - start)
    }

    /// Completes a body delimited by the end of the connection.
    pub fn finish_at_eof(&mut self) {
        if self.state == ReadState::UntilClose {
            self.complete();
        }
    }

    /// Takes the messages completed so far.
    pub fn take_completed(&mut self) -> Vec<RawMessage> {
        mem::take(&mut self.completed)
    }

    fn on_line(&mut self, line: String) -> Result<()> {
        match self.state {
            // Empty lines ahead of a message are tolerated
            ReadState::StartLine if line.is_empty() => {}
            ReadState::StartLine => {
                self.start_line = line;
                self.state = ReadState::Headers;
            }
            ReadState::Headers if line.is_empty() => {
                match self.body_length()? {
                    Some(0) => self.complete(),
                    Some(remaining) => self.state = ReadState::Body { remaining },
                    None => self.state = ReadState::UntilClose,
                }
            }
            ReadState::Headers => {
                let (key, value) = head::parse_header_line(&line)?;
                self.headers.insert(key, value);
            }
            ReadState::Body { .. } | ReadState::UntilClose => {}
        }
        Ok(())
    }

    /// Body length of the current message, `None` when it ends with the
    /// connection.
    fn body_length(&self) -> std::result::Result<Option<usize>, ParseError> {
        let declared = head::content_length(&self.headers)?;
        if declared.is_some_and(|n| n > MAX_BODY_SIZE) {
            return Err(ParseError::BodyTooLarge);
        }

        match self.side {
            Side::Server => Ok(Some(declared.unwrap_or(0))),
            Side::Client => {
                let status = head::parse_status_line(&self.start_line)?.status;
                let head = self.head_requests.front().copied().unwrap_or(false);
                if head || status.forbids_body() {
                    Ok(Some(0))
                } else {
                    Ok(declared)
                }
            }
        }
    }

    fn complete(&mut self) {
        self.completed.push(RawMessage {
            start_line: mem::take(&mut self.start_line),
            headers: mem::take(&mut self.headers),
            body: mem::take(&mut self.body).freeze(),
        });
        self.state = ReadState::StartLine;

        if self.side == Side::Client {
            self.head_requests.pop_front();
        }
    }
}

/// Fills the inbound buffer from the transport and feeds the reader.
pub(crate) struct InboundProcessor<'a, T> {
    pub reader: &'a mut MessageReader,
    pub transport: &'a mut T,
    pub eof: bool,
}

impl<T: Transport> BufferProcessor for InboundProcessor<'_, T> {
    fn pre_process(&mut self, _buffer: &mut Buffer, _max_drained: usize) -> Result<usize> {
        if self.transport.is_negotiated() {
            Ok(0)
        } else {
            Ok(self.transport.negotiate()?)
        }
    }

    fn can_loop(&self, _buffer: &Buffer) -> bool {
        self.transport.is_negotiated()
    }

    fn could_fill(&self, _buffer: &Buffer) -> bool {
        !self.eof
    }

    fn on_fill(&mut self, buffer: &mut Buffer) -> Result<Transfer> {
        Ok(buffer.fill_from(&mut *self.transport)?)
    }

    fn on_fill_eof(&mut self) {
        self.eof = true;
    }

    fn on_drain(&mut self, buffer: &mut Buffer, _max_drained: usize) -> Result<usize> {
        self.reader.read(buffer)
    }
}
