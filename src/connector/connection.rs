//! A single peer connection and its lifecycle.
//!
//! ```text
//!   OPENING ──negotiated──► OPEN ──error / eof / close──► CLOSING ──not busy──► CLOSED
//!      └──────────────────────────error / eof──────────────┘
//! ```
//!
//! Each direction owns a buffer behind its own lock and a busy flag acquired
//! with a non-blocking compare-and-swap, so at most one task reads and one
//! task writes a connection at any time.

use std::collections::{BTreeMap, VecDeque};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::ConnectorConfig;
use crate::connector::inbound::{InboundProcessor, MessageReader, RawMessage};
use crate::connector::outbound::{MessageWriter, OutboundProcessor};
use crate::connector::{MessageQueues, Side};
use crate::error::{Error, Result};
use crate::http::head;
use crate::http::{Exchange, Method, Request, Response};
use crate::io::{Buffer, Transport};

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Transport still negotiating
    Opening = 0,
    /// Messages flow
    Open = 1,
    /// No new work, waiting for in-flight work to finish
    Closing = 2,
    /// Shut down, about to be removed
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Opening,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Releases a busy flag when dropped, including on unwind.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct InboundWay {
    buffer: Buffer,
    reader: MessageReader,
}

struct OutboundWay {
    buffer: Buffer,
    writer: MessageWriter,
}

pub struct Connection<T> {
    id: u64,
    side: Side,
    peer: Option<SocketAddr>,
    pipelining: bool,
    persistent: AtomicBool,
    state: AtomicU8,
    inbound_busy: AtomicBool,
    outbound_busy: AtomicBool,
    transport: Mutex<T>,
    inbound: Mutex<InboundWay>,
    outbound: Mutex<OutboundWay>,
    /// Exchanges to write, keyed by sequence
    outbound_queue: Mutex<BTreeMap<u64, Exchange>>,
    next_sequence: AtomicU64,
    next_write: AtomicU64,
    /// Client side: requests written, waiting for their response
    awaiting: Mutex<VecDeque<Exchange>>,
    /// Server side: requests read, response not written yet
    pending: AtomicUsize,
    write_pending: AtomicBool,
    /// The peer will send nothing more
    input_closed: AtomicBool,
    queues: Arc<MessageQueues>,
}

impl<T: Transport> Connection<T> {
    pub fn new(
        id: u64,
        side: Side,
        transport: T,
        config: &ConnectorConfig,
        queues: Arc<MessageQueues>,
    ) -> Self {
        let state = if transport.is_negotiated() {
            ConnectionState::Open
        } else {
            ConnectionState::Opening
        };

        Self {
            id,
            side,
            peer: transport.peer_addr(),
            pipelining: config.pipelining_connections,
            persistent: AtomicBool::new(config.persisting_connections),
            state: AtomicU8::new(state as u8),
            inbound_busy: AtomicBool::new(false),
            outbound_busy: AtomicBool::new(false),
            transport: Mutex::new(transport),
            inbound: Mutex::new(InboundWay {
                buffer: Buffer::new(config.inbound_buffer_size),
                reader: MessageReader::new(side, config.tracing),
            }),
            outbound: Mutex::new(OutboundWay {
                buffer: Buffer::new(config.outbound_buffer_size),
                writer: MessageWriter::new(side, config.tracing),
            }),
            outbound_queue: Mutex::new(BTreeMap::new()),
            next_sequence: AtomicU64::new(0),
            next_write: AtomicU64::new(0),
            awaiting: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            write_pending: AtomicBool::new(false),
            input_closed: AtomicBool::new(false),
            queues,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent.load(Ordering::Acquire)
    }

    /// Server side: requests read whose response is not written yet.
    pub fn pending_requests(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Client side: requests written whose response is not read yet.
    pub fn awaiting_responses(&self) -> usize {
        self.awaiting.lock().len()
    }

    pub fn queued_writes(&self) -> usize {
        self.outbound_queue.lock().len()
    }

    /// Indicates if a task currently works on either direction.
    pub fn is_busy(&self) -> bool {
        self.inbound_busy.load(Ordering::Acquire)
            || self.outbound_busy.load(Ordering::Acquire)
            || self.inbound.is_locked()
            || self.outbound.is_locked()
    }

    pub fn is_inbound_busy(&self) -> bool {
        self.inbound_busy.load(Ordering::Acquire)
    }

    pub fn is_outbound_busy(&self) -> bool {
        self.outbound_busy.load(Ordering::Acquire)
    }

    /// Clears both busy flags. Tasks still holding a direction lock keep the
    /// connection busy until they return.
    pub fn force_idle(&self) {
        self.inbound_busy.store(false, Ordering::Release);
        self.outbound_busy.store(false, Ordering::Release);
    }

    fn open(&self) {
        if self
            .state
            .compare_exchange(
                ConnectionState::Opening as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            debug!(connection = self.id, side = %self.side, peer = ?self.peer, "Connection opened");
        }
    }

    /// Stops accepting new work. In-flight work finishes first.
    pub fn begin_closing(&self) {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                (state < ConnectionState::Closing as u8).then_some(ConnectionState::Closing as u8)
            });

        if result.is_ok() {
            debug!(connection = self.id, side = %self.side, "Connection closing");
        }
    }

    /// Indicates if a read task would make progress.
    ///
    /// An open connection is only read when it expects a message and bytes
    /// are actually waiting, so idle keep-alive peers cost no worker.
    pub fn can_read(&self) -> bool {
        if self.is_inbound_busy() || self.input_closed.load(Ordering::Acquire) {
            return false;
        }

        match self.state() {
            ConnectionState::Opening => true,
            ConnectionState::Open => {
                let expecting = match self.side {
                    Side::Server => self.pipelining || self.pending_requests() == 0,
                    Side::Client => !self.awaiting.lock().is_empty(),
                };
                expecting && self.has_input()
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        }
    }

    fn has_input(&self) -> bool {
        let buffered = self
            .inbound
            .try_lock()
            .is_some_and(|way| !way.buffer.is_empty());

        buffered
            || self
                .transport
                .try_lock()
                .is_some_and(|transport| transport.has_input())
    }

    /// Indicates if a write task would make progress.
    pub fn can_write(&self) -> bool {
        if self.is_outbound_busy() {
            return false;
        }

        match self.state() {
            ConnectionState::Opening => self.transport_wants_write(),
            ConnectionState::Open => {
                self.write_pending.load(Ordering::Acquire)
                    || self.transport_wants_write()
                    || self.has_ready_exchange()
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        }
    }

    fn transport_wants_write(&self) -> bool {
        self.transport
            .try_lock()
            .is_some_and(|transport| transport.wants_write())
    }

    fn has_ready_exchange(&self) -> bool {
        let queue = self.outbound_queue.lock();
        let next = self.next_write.load(Ordering::Acquire);

        match queue.first_key_value() {
            Some((&sequence, _)) if sequence == next => self.write_allowed(),
            _ => false,
        }
    }

    fn write_allowed(&self) -> bool {
        self.side == Side::Server || self.pipelining || self.awaiting.lock().is_empty()
    }

    fn next_ready(&self) -> Option<Exchange> {
        let mut queue = self.outbound_queue.lock();
        let next = self.next_write.load(Ordering::Acquire);
        let (&sequence, _) = queue.first_key_value()?;

        if sequence != next || !self.write_allowed() {
            return None;
        }

        queue.remove(&sequence)
    }

    /// Queues an exchange for writing. Server exchanges keep the sequence of
    /// their request; client exchanges are numbered here.
    ///
    /// An exchange given to a connection that is no longer open fails
    /// immediately.
    pub fn enqueue(&self, mut exchange: Exchange) {
        if self.state() >= ConnectionState::Closing {
            self.reject(exchange, "Connection is not open");
            return;
        }

        if self.side == Side::Client {
            let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
            exchange.bind(self.id, sequence);
        }

        let sequence = exchange.sequence();
        self.outbound_queue.lock().insert(sequence, exchange);

        // Raced with close(), which may already have drained the queue
        if self.state() == ConnectionState::Closed {
            if let Some(exchange) = self.outbound_queue.lock().remove(&sequence) {
                self.reject(exchange, "Connection closed");
            }
        }
    }

    fn reject(&self, mut exchange: Exchange, detail: &str) {
        exchange.fail(detail);
        exchange.notify_sent();

        if self.side == Side::Client {
            self.queues.inbound.push(exchange);
        }
    }

    /// Reads available bytes and hands completed messages to the inbound
    /// queue. Returns the number of messages read.
    ///
    /// Returns immediately when another task is reading.
    pub fn read_messages(&self) -> usize {
        let Some(_busy) = BusyGuard::acquire(&self.inbound_busy) else {
            return 0;
        };

        match self.read_inner() {
            Ok(count) => count,
            Err(e) => {
                debug!(
                    connection = self.id,
                    side = %self.side,
                    error = %e,
                    "Error while reading messages"
                );
                self.begin_closing();
                0
            }
        }
    }

    fn read_inner(&self) -> Result<usize> {
        let mut guard = self.inbound.lock();
        let way = &mut *guard;

        if self.side == Side::Client {
            let heads = self
                .awaiting
                .lock()
                .iter()
                .map(|exchange| exchange.request.method == Method::HEAD)
                .collect();
            way.reader.set_head_requests(heads);
        }

        let mut transport = self.transport.lock();

        let mut processor = InboundProcessor {
            reader: &mut way.reader,
            transport: &mut *transport,
            eof: false,
        };
        way.buffer.process(&mut processor, 0)?;
        let eof = processor.eof;
        let negotiated = transport.is_negotiated();
        drop(transport);

        if eof {
            way.reader.finish_at_eof();
        }

        let messages = way.reader.take_completed();
        let count = messages.len();
        for message in messages {
            self.deliver(message)?;
        }

        if eof {
            debug!(connection = self.id, side = %self.side, "Peer closed the connection");
            self.input_closed.store(true, Ordering::Release);

            // A half-closed peer still gets the responses it asked for
            if self.side == Side::Server && self.pending_requests() > 0 {
                self.persistent.store(false, Ordering::Release);
            } else {
                self.begin_closing();
            }
        } else if negotiated {
            self.open();
        }

        Ok(count)
    }

    fn deliver(&self, message: RawMessage) -> Result<()> {
        match self.side {
            Side::Server => {
                let line = head::parse_request_line(&message.start_line)?;
                let request = Request {
                    method: line.method,
                    path: line.path,
                    version: line.version,
                    headers: message.headers,
                    body: message.body,
                    target: None,
                };

                if !request.keep_alive() {
                    self.persistent.store(false, Ordering::Release);
                }

                let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel);
                self.pending.fetch_add(1, Ordering::AcqRel);
                self.queues
                    .inbound
                    .push(Exchange::inbound(request, self.id, sequence));
            }
            Side::Client => {
                let line = head::parse_status_line(&message.start_line)?;
                let response = Response {
                    status: line.status,
                    headers: message.headers,
                    body: message.body,
                };

                let closes = response
                    .header("Connection")
                    .is_some_and(|v| v.eq_ignore_ascii_case("close"));
                if closes {
                    self.persistent.store(false, Ordering::Release);
                }

                let mut exchange = self
                    .awaiting
                    .lock()
                    .pop_front()
                    .ok_or(Error::UnexpectedResponse(self.id))?;
                exchange.set_response(response);
                self.queues.inbound.push(exchange);

                if !self.is_persistent() {
                    self.begin_closing();
                }
            }
        }
        Ok(())
    }

    /// Writes queued messages in sequence order until the transport pushes
    /// back. Returns the number of messages completely written.
    ///
    /// Returns immediately when another task is writing.
    pub fn write_messages(&self) -> usize {
        let Some(_busy) = BusyGuard::acquire(&self.outbound_busy) else {
            return 0;
        };

        let mut way = self.outbound.lock();
        match self.write_inner(&mut way) {
            Ok(sent) => sent,
            Err(e) => {
                self.on_write_error(&mut way, e);
                0
            }
        }
    }

    fn write_inner(&self, way: &mut OutboundWay) -> Result<usize> {
        let mut transport = self.transport.lock();

        if self.state() == ConnectionState::Opening {
            let mut processor = OutboundProcessor {
                writer: &mut way.writer,
                transport: &mut *transport,
            };
            way.buffer.process(&mut processor, 0)?;

            if transport.is_negotiated() {
                self.open();
            }
            return Ok(0);
        }

        let mut sent = 0;
        loop {
            if way.writer.is_idle() {
                if self.state() != ConnectionState::Open {
                    break;
                }

                let Some(exchange) = self.next_ready() else {
                    break;
                };
                way.writer.start(exchange, self.is_persistent());
                self.write_pending.store(true, Ordering::Release);
            }

            let mut processor = OutboundProcessor {
                writer: &mut way.writer,
                transport: &mut *transport,
            };
            way.buffer.process(&mut processor, 0)?;

            if !way.writer.is_done(&way.buffer) {
                break;
            }

            self.write_pending.store(false, Ordering::Release);
            if let Some(exchange) = way.writer.finish() {
                self.on_message_sent(exchange);
                sent += 1;
            }
        }

        if transport.wants_write() {
            transport.flush()?;
        }

        Ok(sent)
    }

    fn on_message_sent(&self, mut exchange: Exchange) {
        self.next_write.fetch_add(1, Ordering::AcqRel);
        exchange.notify_sent();

        match self.side {
            Side::Client => self.awaiting.lock().push_back(exchange),
            Side::Server => {
                let pending = self.pending.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
                if pending == 0 && !self.is_persistent() {
                    self.begin_closing();
                }
            }
        }
    }

    fn on_write_error(&self, way: &mut OutboundWay, e: Error) {
        warn!(
            connection = self.id,
            side = %self.side,
            error = %e,
            "Error while writing messages"
        );

        if let Some(mut exchange) = way.writer.abort() {
            exchange.fail(e.to_string());

            if let Err(e) = self.transport.lock().flush() {
                debug!(connection = self.id, error = %e, "Unable to flush the transport");
            }

            self.next_write.fetch_add(1, Ordering::AcqRel);
            exchange.notify_sent();

            match self.side {
                Side::Client => self.queues.inbound.push(exchange),
                Side::Server => {
                    self.pending.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }

        self.write_pending.store(false, Ordering::Release);
        way.buffer.clear();
        self.begin_closing();
    }

    /// Shuts the transport down and fails every exchange still queued,
    /// being written or awaiting its response.
    pub fn close(&self) {
        if self.state.swap(ConnectionState::Closed as u8, Ordering::AcqRel)
            == ConnectionState::Closed as u8
        {
            return;
        }

        if let Err(e) = self.transport.lock().shutdown() {
            debug!(connection = self.id, error = %e, "Error while shutting down the transport");
        }

        let mut abandoned: Vec<Exchange> = mem::take(&mut *self.outbound_queue.lock())
            .into_values()
            .collect();

        // A write task still running reports its own exchange
        if let Some(mut way) = self.outbound.try_lock() {
            abandoned.extend(way.writer.abort());
            way.buffer.clear();
        }

        abandoned.extend(self.awaiting.lock().drain(..));

        for exchange in abandoned {
            self.reject(exchange, "Connection closed");
        }

        debug!(connection = self.id, side = %self.side, peer = ?self.peer, "Connection closed");
    }
}
