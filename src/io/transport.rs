use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Byte channel a connection reads from and writes to.
///
/// Reads and writes never block: a transport with nothing to offer (or no
/// room left) reports `io::ErrorKind::WouldBlock`, and the connection tries
/// again on a later controller tick.
pub trait Transport: Read + Write + Send + 'static {
    /// Advances any pending negotiation. Returns the bytes moved.
    fn negotiate(&mut self) -> io::Result<usize> {
        Ok(0)
    }

    /// Indicates if application bytes can flow.
    fn is_negotiated(&self) -> bool {
        true
    }

    /// Indicates if the transport holds bytes it needs to write on its own.
    fn wants_write(&self) -> bool {
        false
    }

    /// Indicates if a read could make progress: bytes are waiting, or the
    /// peer closed its side. Must not consume anything.
    fn has_input(&self) -> bool {
        true
    }

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// Closes both directions. The transport is unusable afterwards.
    fn shutdown(&mut self) -> io::Result<()>;
}

/// Plain TCP socket in non-blocking mode.
#[derive(Debug)]
pub struct PlainTransport {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl PlainTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        Ok(Self { stream, peer })
    }

    /// Opens a socket to `addr`, blocking until connected.
    pub fn connect(addr: SocketAddr) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        Self::new(stream)
    }
}

impl Read for PlainTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for PlainTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for PlainTransport {
    fn has_input(&self) -> bool {
        let mut byte = [0u8; 1];
        match self.stream.peek(&mut byte) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            // Data, end of stream or an error, all surfaced by the next read
            _ => true,
        }
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
