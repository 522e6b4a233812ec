//! Secure layered transport.
//!
//! A [`TunnelTransport`] stacks a [`TunnelSession`] on top of another
//! transport. The session owns the cryptographic state; the tunnel moves its
//! handshake records and sealed application records over the wire. The
//! connection sees plaintext only, and stays in its opening state until the
//! session is established and its last handshake record is flushed.

use std::io::{self, Read, Write};
use std::net::SocketAddr;

use bytes::{Buf, Bytes, BytesMut};
use tracing::debug;

use crate::io::buffer::{Buffer, Transfer};
use crate::io::transport::Transport;

/// Record layer of a secure session.
pub trait TunnelSession: Send + 'static {
    /// Consumes handshake bytes received from the peer. Returns the number
    /// consumed; an incomplete record is left for the next call.
    fn receive_handshake(&mut self, input: &[u8]) -> io::Result<usize>;

    /// Next handshake record to send, if any.
    fn next_handshake(&mut self) -> Option<Bytes>;

    fn is_established(&self) -> bool;

    /// Protects application bytes for the wire.
    fn seal(&mut self, plain: &[u8]) -> Bytes;

    /// Recovers application bytes from wire bytes into `plain`. Returns the
    /// number of wire bytes consumed.
    fn unseal(&mut self, wire: &[u8], plain: &mut BytesMut) -> io::Result<usize>;
}

pub struct TunnelTransport<S, T> {
    inner: T,
    session: S,
    wire_in: Buffer,
    wire_out: BytesMut,
    plain: BytesMut,
    negotiated: bool,
}

impl<S: TunnelSession, T: Transport> TunnelTransport<S, T> {
    /// Wraps `inner`, staging the session's opening handshake records.
    pub fn new(inner: T, session: S, capacity: usize) -> Self {
        let mut tunnel = Self {
            inner,
            session,
            wire_in: Buffer::new(capacity),
            wire_out: BytesMut::with_capacity(capacity),
            plain: BytesMut::with_capacity(capacity),
            negotiated: false,
        };
        tunnel.stage_handshake();
        tunnel
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    fn stage_handshake(&mut self) {
        while let Some(record) = self.session.next_handshake() {
            self.wire_out.extend_from_slice(&record);
        }
    }

    /// Writes staged wire bytes until the inner transport pushes back.
    fn flush_wire(&mut self) -> io::Result<usize> {
        let mut written = 0;

        while !self.wire_out.is_empty() {
            match self.inner.write(&self.wire_out) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write tunnel records",
                    ));
                }
                Ok(n) => {
                    self.wire_out.advance(n);
                    written += n;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(written)
    }

    fn pull_wire(&mut self) -> io::Result<Transfer> {
        self.wire_in.before_fill();

        if !self.wire_in.can_fill() && self.wire_in.can_compact() {
            self.wire_in.compact();
        }

        self.wire_in.fill_from(&mut self.inner)
    }

    fn update_negotiated(&mut self) {
        if !self.negotiated && self.session.is_established() && self.wire_out.is_empty() {
            debug!(peer = ?self.inner.peer_addr(), "Tunnel established");
            self.negotiated = true;
        }
    }
}

impl<S: TunnelSession, T: Transport> Read for TunnelTransport<S, T> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if !self.session.is_established() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        loop {
            if !self.plain.is_empty() {
                let n = out.len().min(self.plain.len());
                out[..n].copy_from_slice(&self.plain[..n]);
                self.plain.advance(n);
                return Ok(n);
            }

            self.wire_in.before_drain();
            if !self.wire_in.is_empty() {
                let consumed = self.session.unseal(self.wire_in.pending(), &mut self.plain)?;
                self.wire_in.consume(consumed);

                if !self.plain.is_empty() {
                    continue;
                }
            }

            match self.pull_wire()? {
                Transfer::Eof => return Ok(0),
                Transfer::Bytes(0) => return Err(io::ErrorKind::WouldBlock.into()),
                Transfer::Bytes(_) => {}
            }
        }
    }
}

impl<S: TunnelSession, T: Transport> Write for TunnelTransport<S, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.flush_wire()?;

        if !self.negotiated || !self.wire_out.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let record = self.session.seal(buf);
        self.wire_out.extend_from_slice(&record);
        self.flush_wire()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_wire()?;
        self.inner.flush()
    }
}

impl<S: TunnelSession, T: Transport> Transport for TunnelTransport<S, T> {
    fn negotiate(&mut self) -> io::Result<usize> {
        let mut progress = self.flush_wire()?;

        if !self.session.is_established() {
            match self.pull_wire()? {
                Transfer::Eof => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed the tunnel during negotiation",
                    ));
                }
                Transfer::Bytes(n) => progress += n,
            }

            self.wire_in.before_drain();
            let consumed = self.session.receive_handshake(self.wire_in.pending())?;
            self.wire_in.consume(consumed);

            self.stage_handshake();
            progress += self.flush_wire()?;
        }

        self.update_negotiated();
        Ok(progress)
    }

    fn is_negotiated(&self) -> bool {
        self.negotiated
    }

    fn wants_write(&self) -> bool {
        !self.wire_out.is_empty()
    }

    fn has_input(&self) -> bool {
        !self.plain.is_empty() || self.inner.has_input()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        if let Err(e) = self.flush_wire() {
            debug!(error = %e, "Dropping unsent tunnel records");
        }
        self.inner.shutdown()
    }
}
