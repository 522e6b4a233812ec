//! Reusable byte buffer with a two-phase (filling/draining) access discipline.
//!
//! A [`Buffer`] wraps a fixed-capacity byte region. While **filling**, bytes
//! are appended after `position`; bytes between `fill_begin` and `position`
//! were filled but not drained yet. While **draining**, the bytes between
//! `position` and `limit` are ready to be consumed.
//!
//! ```text
//!  filling:   [ drained | undrained ......... | free ........ ]
//!             0     fill_begin            position      limit=capacity
//!
//!  draining:  [ consumed | ready ............ | stale ....... ]
//!             0       position             limit       capacity
//! ```
//!
//! [`Buffer::flip`] moves between the two phases without copying, and
//! [`Buffer::compact`] slides undrained bytes back to the front when the tail
//! runs out of space.

use std::fmt;
use std::io::{self, Read, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::error::{Error, Result};
use crate::io::processor::BufferProcessor;

/// Phase of a [`Buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting new bytes
    Filling,
    /// Handing out previously filled bytes
    Draining,
}

/// Outcome of a fill or a processing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Number of bytes moved, possibly zero when nothing was available
    Bytes(usize),
    /// The source reached its end of stream
    Eof,
}

impl Transfer {
    /// Returns the number of bytes moved, zero for [`Transfer::Eof`].
    pub fn bytes(self) -> usize {
        match self {
            Transfer::Bytes(n) => n,
            Transfer::Eof => 0,
        }
    }

    pub fn is_eof(self) -> bool {
        self == Transfer::Eof
    }
}

/// Progress of an incremental line parse, see [`Buffer::drain_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineState {
    /// No byte of the line seen yet
    #[default]
    Idle,
    /// Collecting line characters
    Reading,
    /// Carriage return seen, line feed expected next
    CarriageReturn,
    /// Full line terminated by CRLF
    Complete,
}

/// Fixed-capacity byte region reused across messages.
///
/// Not internally synchronized: a connection keeps each buffer behind the lock
/// of its direction, and at most one task drives a direction at a time.
pub struct Buffer {
    bytes: BytesMut,
    position: usize,
    limit: usize,
    fill_begin: usize,
    state: BufferState,
}

impl Buffer {
    /// Allocates an empty buffer in the filling state.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::zeroed(capacity),
            position: 0,
            limit: capacity,
            fill_begin: 0,
            state: BufferState::Filling,
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn is_filling(&self) -> bool {
        self.state == BufferState::Filling
    }

    pub fn is_draining(&self) -> bool {
        self.state == BufferState::Draining
    }

    /// Number of bytes that can be filled in (filling) or drained (draining).
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.limit
    }

    /// Indicates if no undrained byte is held, whatever the phase.
    pub fn is_empty(&self) -> bool {
        match self.state {
            BufferState::Filling => self.position == self.fill_begin,
            BufferState::Draining => !self.has_remaining(),
        }
    }

    /// Indicates if more bytes can be filled in right now.
    pub fn can_fill(&self) -> bool {
        self.is_filling() && self.has_remaining()
    }

    /// Indicates if more bytes can be drained right now.
    pub fn can_drain(&self) -> bool {
        self.is_draining() && self.has_remaining()
    }

    /// Indicates if compacting would reclaim space at the front.
    pub fn can_compact(&self) -> bool {
        match self.state {
            BufferState::Filling => self.fill_begin > 0,
            BufferState::Draining => self.position > 0,
        }
    }

    /// Indicates if bytes could be drained after flipping.
    pub fn could_drain(&self) -> bool {
        self.is_filling() && self.position > self.fill_begin
    }

    /// Indicates if bytes could be filled in after flipping.
    pub fn could_fill(&self) -> bool {
        self.is_draining() && (!self.has_remaining() || self.limit < self.capacity())
    }

    /// Flips to draining if currently filling.
    pub fn before_drain(&mut self) {
        if self.is_filling() {
            self.flip();
        }
    }

    /// Flips to filling if currently draining.
    pub fn before_fill(&mut self) {
        if self.is_draining() {
            self.flip();
        }
    }

    /// Recycles the buffer: empty and filling.
    pub fn clear(&mut self) {
        self.fill_begin = 0;
        self.position = 0;
        self.limit = self.capacity();
        self.state = BufferState::Filling;
    }

    /// Switches between filling and draining, preserving undrained bytes.
    pub fn flip(&mut self) {
        match self.state {
            BufferState::Filling => {
                self.state = BufferState::Draining;
                self.limit = self.position;
                self.position = self.fill_begin;
                self.fill_begin = 0;
            }
            BufferState::Draining if self.has_remaining() => {
                self.state = BufferState::Filling;
                self.fill_begin = self.position;
                self.position = self.limit;
                self.limit = self.capacity();
            }
            BufferState::Draining => self.clear(),
        }
    }

    /// Moves the undrained bytes to the beginning of the region.
    pub fn compact(&mut self) {
        match self.state {
            BufferState::Draining => {
                let len = self.remaining();
                self.bytes.copy_within(self.position..self.limit, 0);
                self.position = 0;
                self.limit = len;
            }
            BufferState::Filling => {
                let len = self.position - self.fill_begin;
                self.bytes.copy_within(self.fill_begin..self.position, 0);
                self.fill_begin = 0;
                self.position = len;
            }
        }
    }

    /// Copies as many bytes of `source` as fit. Returns the number copied.
    pub fn fill(&mut self, source: &[u8]) -> usize {
        if !self.can_fill() {
            return 0;
        }

        let n = source.len().min(self.remaining());
        self.bytes[self.position..self.position + n].copy_from_slice(&source[..n]);
        self.position += n;
        n
    }

    /// Reads once from `source` into the free space.
    ///
    /// Returns `Transfer::Bytes(0)` when the source has nothing available
    /// without blocking and `Transfer::Eof` when it reached its end.
    pub fn fill_from<R: Read + ?Sized>(&mut self, source: &mut R) -> io::Result<Transfer> {
        if !self.can_fill() {
            return Ok(Transfer::Bytes(0));
        }

        loop {
            match source.read(&mut self.bytes[self.position..self.limit]) {
                Ok(0) => return Ok(Transfer::Eof),
                Ok(n) => {
                    self.position += n;
                    return Ok(Transfer::Bytes(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Transfer::Bytes(0)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Copies as many ready bytes as fit into `target`. Returns the number copied.
    pub fn drain(&mut self, target: &mut [u8]) -> usize {
        if !self.can_drain() {
            return 0;
        }

        let n = target.len().min(self.remaining());
        target[..n].copy_from_slice(&self.bytes[self.position..self.position + n]);
        self.position += n;
        n
    }

    /// Ready bytes, empty unless draining.
    pub fn pending(&self) -> &[u8] {
        if self.is_draining() {
            &self.bytes[self.position..self.limit]
        } else {
            &[]
        }
    }

    /// Marks `n` ready bytes as drained.
    pub fn consume(&mut self, n: usize) {
        if self.is_draining() {
            self.position += n.min(self.remaining());
        }
    }

    /// Writes ready bytes to `target` once.
    ///
    /// Stops early when the target pushes back; the unwritten bytes stay ready
    /// for the next call.
    pub fn drain_into<W: Write + ?Sized>(&mut self, target: &mut W) -> io::Result<usize> {
        if !self.can_drain() {
            return Ok(0);
        }

        loop {
            match target.write(&self.bytes[self.position..self.limit]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write buffered bytes",
                    ));
                }
                Ok(n) => {
                    self.position += n;
                    return Ok(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Drains ready bytes into `line` until a CRLF terminator is consumed.
    ///
    /// The line may span several calls; pass back the returned state each
    /// time and reset it to [`LineState::Idle`] once the line is handled. The
    /// terminator is not appended to `line`.
    pub fn drain_line(&mut self, line: &mut String, state: LineState) -> Result<LineState> {
        let mut state = match state {
            LineState::Idle => LineState::Reading,
            other => other,
        };

        while state != LineState::Complete && self.can_drain() {
            let next = self.bytes[self.position];
            self.position += 1;

            match state {
                LineState::Reading if next == b'\r' => state = LineState::CarriageReturn,
                // Head lines are ISO-8859-1
                LineState::Reading => line.push(char::from(next)),
                LineState::CarriageReturn if next == b'\n' => state = LineState::Complete,
                LineState::CarriageReturn => return Err(Error::MalformedLine { found: next }),
                LineState::Idle | LineState::Complete => unreachable!("line state normalized above"),
            }
        }

        Ok(state)
    }

    /// Drives the buffer through fill and drain phases with `processor`.
    ///
    /// Loops while the processor allows it and progress is made, draining
    /// ready bytes and filling new ones, flipping or compacting in between.
    /// `max_drained` caps the bytes drained by this call, zero for no cap.
    ///
    /// Returns the number of bytes drained, or [`Transfer::Eof`] when nothing
    /// was drained and the filling source cannot supply more.
    pub fn process<P: BufferProcessor + ?Sized>(
        &mut self,
        processor: &mut P,
        max_drained: usize,
    ) -> Result<Transfer> {
        let mut drained_total = processor.pre_process(self, max_drained)?;
        let mut filled_total = 0;
        let mut last_drain_failed = false;
        let mut last_fill_failed = false;
        let mut fill_ended = false;
        let mut try_again = true;

        trace!(buffer = ?self, pre_processed = drained_total, "Beginning buffer processing");

        while try_again && processor.can_loop(self) {
            match self.state {
                BufferState::Draining => {
                    let mut drained = 0;

                    if self.has_remaining() {
                        if max_drained == 0 {
                            drained = processor.on_drain(self, 0)?;
                        } else if max_drained > drained_total {
                            drained = processor.on_drain(self, max_drained - drained_total)?;
                        }
                    }

                    if drained > 0 {
                        drained_total += drained;
                        last_drain_failed = false;
                        last_fill_failed = false;
                    } else {
                        if last_fill_failed {
                            try_again = false;
                        } else if self.could_fill() {
                            self.before_fill();
                        } else if self.can_compact() {
                            self.compact();
                        } else {
                            try_again = false;
                        }

                        last_drain_failed = true;
                    }
                }
                BufferState::Filling => {
                    let mut filled = Transfer::Bytes(0);

                    if self.has_remaining() && processor.could_fill(self) {
                        filled = processor.on_fill(self)?;
                    }

                    match filled {
                        Transfer::Bytes(n) if n > 0 => {
                            filled_total += n;
                            last_drain_failed = false;
                            last_fill_failed = false;
                        }
                        _ => {
                            if !last_drain_failed && self.could_drain() {
                                self.before_drain();
                            } else {
                                try_again = false;
                            }

                            if filled.is_eof() {
                                fill_ended = true;
                                processor.on_fill_eof();
                            }

                            last_fill_failed = true;
                        }
                    }
                }
            }
        }

        let outcome = if drained_total == 0 && (fill_ended || !processor.could_fill(self)) {
            Transfer::Eof
        } else {
            Transfer::Bytes(drained_total)
        };

        trace!(
            buffer = ?self,
            ?outcome,
            filled = filled_total,
            try_again,
            "Ending buffer processing"
        );

        processor.post_process(outcome);
        Ok(outcome)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("capacity", &self.capacity())
            .field("fill_begin", &self.fill_begin)
            .field("state", &self.state)
            .finish()
    }
}
