//! Connector helper: owns the connections, the message queues, the worker
//! pool and the controller of one connector side.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::connector::connection::Connection;
use crate::connector::controller::{self, Controller};
use crate::connector::handler::MessageHandler;
use crate::connector::worker::WorkerPool;
use crate::connector::{MessageQueues, Side};
use crate::error::{Error, Result};
use crate::http::{Exchange, Request};
use crate::io::Transport;

/// Bound on the wait for running worker tasks during [`Helper::stop`].
const WORKER_TERMINATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on the wait for the controller task during [`Helper::stop`].
const CONTROLLER_TERMINATION_TIMEOUT: Duration = Duration::from_secs(10);
const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Helper<T: Transport> {
    side: Side,
    config: ConnectorConfig,
    connections: DashMap<u64, Arc<Connection<T>>>,
    queues: Arc<MessageQueues>,
    handler: Arc<dyn MessageHandler<T>>,
    controller: Controller,
    workers: Mutex<Option<Arc<WorkerPool>>>,
    controller_task: Mutex<Option<JoinHandle<()>>>,
    accepting: watch::Sender<bool>,
    next_id: AtomicU64,
    stopped: AtomicBool,
}

impl<T: Transport> Helper<T> {
    pub fn new(
        side: Side,
        config: ConnectorConfig,
        handler: impl MessageHandler<T>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let (accepting, _) = watch::channel(false);

        Ok(Arc::new(Self {
            side,
            controller: Controller::new(side, config.controller_sleep_time()),
            config,
            connections: DashMap::new(),
            queues: Arc::new(MessageQueues::default()),
            handler: Arc::new(handler),
            workers: Mutex::new(None),
            controller_task: Mutex::new(None),
            accepting,
            next_id: AtomicU64::new(1),
            stopped: AtomicBool::new(false),
        }))
    }

    /// Creates the worker pool and launches the controller.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut workers = self.workers.lock();
        if workers.is_some() {
            return Ok(());
        }

        let pool = Arc::new(WorkerPool::new(self.side, &self.config)?);
        self.controller.start();

        let task = pool.handle().spawn(controller::run(
            Arc::downgrade(self),
            Arc::clone(&pool),
            self.config.controller_sleep_time(),
        ));

        *self.controller_task.lock() = Some(task);
        *workers = Some(pool);
        self.accepting.send_replace(true);

        info!(
            side = %self.side,
            min_threads = self.config.min_threads,
            max_threads = self.config.max_threads,
            "Connector helper started"
        );
        Ok(())
    }

    /// Stops the helper gracefully.
    ///
    /// Stops accepting, lets running tasks finish (30 s at most), lets the
    /// controller close the remaining connections (10 s at most), then tears
    /// the worker runtime down. Blocks; must not be called from an async
    /// context.
    pub fn stop(&self) {
        let Some(pool) = self.workers.lock().clone() else {
            return;
        };

        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        info!(side = %self.side, "Stopping connector helper");

        self.accepting.send_replace(false);
        pool.shutdown();

        for connection in self.connections() {
            connection.begin_closing();
            connection.force_idle();
        }

        if !pool.await_termination(WORKER_TERMINATION_TIMEOUT) {
            debug!(
                side = %self.side,
                timeout = ?WORKER_TERMINATION_TIMEOUT,
                "Worker tasks still running after timeout"
            );
        }

        self.controller.stop();
        if let Some(task) = self.controller_task.lock().take() {
            let finished =
                pool.block_on(async { tokio::time::timeout(CONTROLLER_TERMINATION_TIMEOUT, task).await });

            if finished.is_err() {
                debug!(
                    side = %self.side,
                    timeout = ?CONTROLLER_TERMINATION_TIMEOUT,
                    "Controller still running after timeout"
                );
            }
        }

        for connection in self.connections() {
            warn!(
                side = %self.side,
                connection = connection.id(),
                state = ?connection.state(),
                "Connection left open at stop, closing it"
            );
            connection.close();
        }
        self.connections.clear();

        pool.shutdown_runtime(RUNTIME_SHUTDOWN_TIMEOUT);
        info!(side = %self.side, "Connector helper stopped");
    }

    pub fn is_started(&self) -> bool {
        self.workers.lock().is_some() && !self.stopped.load(Ordering::Acquire)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn workers(&self) -> Option<Arc<WorkerPool>> {
        self.workers.lock().clone()
    }

    /// Runtime hosting the controller and the worker tasks.
    pub fn runtime(&self) -> Result<Handle> {
        self.workers
            .lock()
            .as_ref()
            .map(|pool| pool.handle().clone())
            .ok_or(Error::NotStarted)
    }

    /// Signal flipping to false when the helper stops accepting connections.
    pub fn accepting(&self) -> watch::Receiver<bool> {
        self.accepting.subscribe()
    }

    /// Indicates if every worker is busy, the only overload signal.
    pub fn is_worker_service_full(&self) -> bool {
        self.workers
            .lock()
            .as_ref()
            .is_some_and(|pool| pool.is_full())
    }

    /// Adds a connection over `transport`.
    pub fn register(&self, transport: T) -> Arc<Connection<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let connection = Arc::new(Connection::new(
            id,
            self.side,
            transport,
            &self.config,
            Arc::clone(&self.queues),
        ));

        debug!(
            side = %self.side,
            connection = id,
            peer = ?connection.peer_addr(),
            state = ?connection.state(),
            "Connection registered"
        );

        self.connections.insert(id, Arc::clone(&connection));
        connection
    }

    pub(crate) fn remove(&self, id: u64) {
        if self.connections.remove(&id).is_some() {
            debug!(side = %self.side, connection = id, "Connection removed");
        }
    }

    pub fn connection(&self, id: u64) -> Option<Arc<Connection<T>>> {
        self.connections.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of the current connections.
    pub fn connections(&self) -> Vec<Arc<Connection<T>>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Indicates if one more connection with `peer` stays within the limits.
    pub fn admits(&self, peer: Option<SocketAddr>) -> bool {
        let total = self.config.max_total_connections;
        if total >= 0 && self.connection_count() >= total as usize {
            return false;
        }

        let per_host = self.config.max_connections_per_host;
        if let (true, Some(peer)) = (per_host >= 0, peer) {
            let same_host = self
                .connections
                .iter()
                .filter(|entry| entry.value().peer_addr().map(|a| a.ip()) == Some(peer.ip()))
                .count();
            if same_host >= per_host as usize {
                return false;
            }
        }

        true
    }

    pub fn submit_inbound(&self, exchange: Exchange) {
        self.queues.inbound.push(exchange);
    }

    pub fn submit_outbound(&self, exchange: Exchange) {
        self.queues.outbound.push(exchange);
    }

    pub fn queued_inbound(&self) -> usize {
        self.queues.inbound.len()
    }

    pub fn queued_outbound(&self) -> usize {
        self.queues.outbound.len()
    }

    pub(crate) fn pop_inbound(&self) -> Option<Exchange> {
        self.queues.inbound.pop()
    }

    pub(crate) fn pop_outbound(&self) -> Option<Exchange> {
        self.queues.outbound.pop()
    }

    pub fn handle_inbound(&self, exchange: Exchange) {
        self.handler.handle_inbound(self, exchange);
    }

    pub fn handle_outbound(&self, exchange: Exchange) {
        self.handler.handle_outbound(self, exchange);
    }

    /// Handles the next queued inbound exchange on the calling thread.
    /// Returns false when the queue was empty.
    pub fn handle_next_inbound(&self) -> bool {
        match self.pop_inbound() {
            Some(exchange) => {
                self.handle_inbound(exchange);
                true
            }
            None => false,
        }
    }

    /// Handles the next queued outbound exchange on the calling thread.
    /// Returns false when the queue was empty.
    pub fn handle_next_outbound(&self) -> bool {
        match self.pop_outbound() {
            Some(exchange) => {
                self.handle_outbound(exchange);
                true
            }
            None => false,
        }
    }

    /// Sends a client request. The receiver resolves with the exchange once
    /// its response arrived or the exchange failed.
    pub fn send(&self, request: Request) -> oneshot::Receiver<Exchange> {
        self.send_exchange(Exchange::new(request))
    }

    /// Like [`Helper::send`], keeping the exchange's completion callback.
    pub fn send_exchange(&self, exchange: Exchange) -> oneshot::Receiver<Exchange> {
        let (reply, receiver) = oneshot::channel();
        self.submit_outbound(exchange.with_reply(reply));
        receiver
    }

    fn abandon(&self, pool: &WorkerPool) {
        self.accepting.send_replace(false);
        self.controller.stop();
        pool.shutdown();
        if let Some(task) = self.controller_task.lock().take() {
            task.abort();
        }
        pool.shutdown_background();
    }
}

impl<T: Transport> Drop for Helper<T> {
    fn drop(&mut self) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }

        let Some(pool) = self.workers.get_mut().clone() else {
            return;
        };

        // Blocking inside a runtime is not allowed, abandon instead
        if self.config.controller_daemon || Handle::try_current().is_ok() {
            debug!(side = %self.side, "Abandoning connector helper");
            self.abandon(&pool);
        } else {
            self.stop();
        }
    }
}

impl<T: Transport> std::fmt::Debug for Helper<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Helper")
            .field("side", &self.side)
            .field("connections", &self.connections.len())
            .field("queued_inbound", &self.queues.inbound.len())
            .field("queued_outbound", &self.queues.outbound.len())
            .field("controller", &self.controller)
            .finish()
    }
}
