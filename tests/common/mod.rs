//! In-memory transports and sessions shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use conduit::io::{TunnelSession, Transport};
use parking_lot::Mutex;

/// Transport reading from a script and recording what is written.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    pub input: Arc<Mutex<VecDeque<u8>>>,
    pub output: Arc<Mutex<Vec<u8>>>,
    pub eof: Arc<AtomicBool>,
    pub closed: Arc<AtomicBool>,
    pub reads: Arc<AtomicUsize>,
    pub writing: Arc<AtomicBool>,
    pub read_delay: Duration,
    pub write_delay: Duration,
    pub fail_writes: bool,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&self, bytes: &[u8]) {
        self.input.lock().extend(bytes.iter().copied());
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output.lock()).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::AcqRel);
        if !self.read_delay.is_zero() {
            std::thread::sleep(self.read_delay);
        }

        let mut input = self.input.lock();
        if input.is_empty() {
            return if self.eof.load(Ordering::Acquire) {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }

        let n = buf.len().min(input.len());
        for (slot, byte) in buf.iter_mut().zip(input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.fail_writes {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        self.writing.store(true, Ordering::Release);
        if !self.write_delay.is_zero() {
            std::thread::sleep(self.write_delay);
        }

        self.output.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn has_input(&self) -> bool {
        !self.input.lock().is_empty() || self.eof.load(Ordering::Acquire)
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        "127.0.0.1:9".parse().ok()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// One end of an in-memory duplex pipe.
pub struct MemoryTransport {
    pub incoming: Arc<Mutex<VecDeque<u8>>>,
    pub outgoing: Arc<Mutex<VecDeque<u8>>>,
}

impl MemoryTransport {
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Mutex::new(VecDeque::new()));
        let b = Arc::new(Mutex::new(VecDeque::new()));

        (
            Self {
                incoming: Arc::clone(&a),
                outgoing: Arc::clone(&b),
            },
            Self {
                incoming: b,
                outgoing: a,
            },
        )
    }
}

impl Read for MemoryTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut incoming = self.incoming.lock();
        if incoming.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }

        let n = buf.len().min(incoming.len());
        for (slot, byte) in buf.iter_mut().zip(incoming.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.outgoing.lock().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn has_input(&self) -> bool {
        !self.incoming.lock().is_empty()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

const XOR_KEY: u8 = 0x5a;

/// Toy session: a HELLO/READY handshake, then XOR-masked records.
pub struct XorSession {
    client: bool,
    established: bool,
    outgoing: Option<Bytes>,
}

impl XorSession {
    pub fn client() -> Self {
        Self {
            client: true,
            established: false,
            outgoing: Some(Bytes::from_static(b"HELLO")),
        }
    }

    pub fn server() -> Self {
        Self {
            client: false,
            established: false,
            outgoing: None,
        }
    }

    fn expected(&self) -> &'static [u8] {
        if self.client { b"READY" } else { b"HELLO" }
    }
}

impl TunnelSession for XorSession {
    fn receive_handshake(&mut self, input: &[u8]) -> io::Result<usize> {
        let expected = self.expected();
        if input.len() < expected.len() {
            return Ok(0);
        }

        if &input[..expected.len()] != expected {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "unexpected handshake"));
        }

        self.established = true;
        if !self.client {
            self.outgoing = Some(Bytes::from_static(b"READY"));
        }
        Ok(expected.len())
    }

    fn next_handshake(&mut self) -> Option<Bytes> {
        self.outgoing.take()
    }

    fn is_established(&self) -> bool {
        self.established
    }

    fn seal(&mut self, plain: &[u8]) -> Bytes {
        plain.iter().map(|b| b ^ XOR_KEY).collect::<Vec<u8>>().into()
    }

    fn unseal(&mut self, wire: &[u8], plain: &mut BytesMut) -> io::Result<usize> {
        plain.extend(wire.iter().map(|b| b ^ XOR_KEY));
        Ok(wire.len())
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
