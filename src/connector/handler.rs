//! Message handlers: what a helper does with the exchanges it dispatches.

use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::connector::connection::{Connection, ConnectionState};
use crate::connector::helper::Helper;
use crate::http::{Exchange, Request, Response};
use crate::io::{PlainTransport, Transport};

/// Extension point of a helper, called on worker threads.
///
/// `handle_inbound` receives exchanges whose incoming message was read (a
/// request on the server side, a response on the client side);
/// `handle_outbound` receives exchanges whose outgoing message is ready to be
/// written.
pub trait MessageHandler<T: Transport>: Send + Sync + 'static {
    fn handle_inbound(&self, helper: &Helper<T>, exchange: Exchange);

    fn handle_outbound(&self, helper: &Helper<T>, exchange: Exchange);
}

/// Server side: answers requests with a service function.
pub struct ServerHandler<F> {
    service: F,
}

impl<F> ServerHandler<F>
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    pub fn new(service: F) -> Self {
        Self { service }
    }
}

impl<T, F> MessageHandler<T> for ServerHandler<F>
where
    T: Transport,
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    fn handle_inbound(&self, helper: &Helper<T>, mut exchange: Exchange) {
        let response = match panic::catch_unwind(AssertUnwindSafe(|| (self.service)(&exchange.request))) {
            Ok(response) => response,
            Err(_) => {
                error!(
                    method = %exchange.request.method,
                    path = %exchange.request.path,
                    "Service panicked while handling request"
                );
                Response::internal_error()
            }
        };

        exchange.set_response(response);
        helper.submit_outbound(exchange);
    }

    fn handle_outbound(&self, helper: &Helper<T>, mut exchange: Exchange) {
        match exchange.connection().and_then(|id| helper.connection(id)) {
            Some(connection) => connection.enqueue(exchange),
            None => {
                debug!(connection = ?exchange.connection(), "Connection gone, dropping response");
                exchange.fail("Connection closed");
                exchange.notify_sent();
            }
        }
    }
}

type Dialer<T> = dyn Fn(SocketAddr) -> io::Result<T> + Send + Sync;

/// Client side: opens or reuses connections for requests and hands responses
/// back to their callers.
pub struct ClientHandler<T> {
    dial: Arc<Dialer<T>>,
}

impl<T: Transport> ClientHandler<T> {
    pub fn new(dial: impl Fn(SocketAddr) -> io::Result<T> + Send + Sync + 'static) -> Self {
        Self {
            dial: Arc::new(dial),
        }
    }

    /// Open persistent connection to `addr` able to take one more request.
    fn reusable(&self, helper: &Helper<T>, addr: SocketAddr) -> Option<Arc<Connection<T>>> {
        let pipelining = helper.config().pipelining_connections;

        helper.connections().into_iter().find(|connection| {
            connection.peer_addr() == Some(addr)
                && connection.state() == ConnectionState::Open
                && connection.is_persistent()
                && (pipelining
                    || (connection.awaiting_responses() == 0 && connection.queued_writes() == 0))
        })
    }

    fn fail(helper: &Helper<T>, mut exchange: Exchange, detail: String) {
        exchange.fail(detail);
        exchange.notify_sent();
        helper.submit_inbound(exchange);
    }
}

impl ClientHandler<PlainTransport> {
    /// Dials plain TCP connections.
    pub fn plain() -> Self {
        Self::new(PlainTransport::connect)
    }
}

impl<T: Transport> MessageHandler<T> for ClientHandler<T> {
    fn handle_inbound(&self, _helper: &Helper<T>, exchange: Exchange) {
        if !exchange.reply() {
            debug!("No caller awaits the response anymore");
        }
    }

    fn handle_outbound(&self, helper: &Helper<T>, exchange: Exchange) {
        let Some(addr) = exchange.request.target_addr() else {
            warn!(path = %exchange.request.path, "Unable to resolve the request target");
            Self::fail(helper, exchange, "Unable to resolve the request target".to_string());
            return;
        };

        let connection = match self.reusable(helper, addr) {
            Some(connection) => connection,
            None => {
                if !helper.admits(Some(addr)) {
                    debug!(%addr, "Connection limit reached, deferring request");
                    helper.submit_outbound(exchange);
                    return;
                }

                match (self.dial)(addr) {
                    Ok(transport) => helper.register(transport),
                    Err(e) => {
                        warn!(%addr, error = %e, "Unable to connect");
                        Self::fail(helper, exchange, format!("Unable to connect to {}: {}", addr, e));
                        return;
                    }
                }
            }
        };

        connection.enqueue(exchange);
    }
}
