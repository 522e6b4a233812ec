use std::fmt;

use tokio::sync::oneshot;

use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};

/// Callback fired once the response (server side) or request (client side)
/// of an exchange left the connector, successfully or not.
pub type SentCallback = Box<dyn FnOnce(&Exchange) + Send>;

/// A request paired with its response as it travels through the connector.
///
/// The completion callback fires exactly once: when the message is written,
/// when writing it fails, or at the latest when the exchange is dropped.
pub struct Exchange {
    pub request: Request,
    pub response: Option<Response>,
    connection: Option<u64>,
    sequence: u64,
    on_sent: Option<SentCallback>,
    reply: Option<oneshot::Sender<Exchange>>,
}

impl Exchange {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            response: None,
            connection: None,
            sequence: 0,
            on_sent: None,
            reply: None,
        }
    }

    /// Exchange for a request read from connection `connection`.
    pub fn inbound(request: Request, connection: u64, sequence: u64) -> Self {
        let mut exchange = Self::new(request);
        exchange.bind(connection, sequence);
        exchange
    }

    pub fn on_sent(mut self, callback: impl FnOnce(&Exchange) + Send + 'static) -> Self {
        self.on_sent = Some(Box::new(callback));
        self
    }

    pub(crate) fn with_reply(mut self, reply: oneshot::Sender<Exchange>) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn connection(&self) -> Option<u64> {
        self.connection
    }

    /// Position of the exchange in its connection's write order.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn bind(&mut self, connection: u64, sequence: u64) {
        self.connection = Some(connection);
        self.sequence = sequence;
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response.as_ref().map(|r| r.status)
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = Some(response);
    }

    /// Replaces the response with a connector communication error.
    pub fn fail(&mut self, detail: impl Into<String>) {
        self.response = Some(Response::communication_error(detail));
    }

    pub fn is_sent_pending(&self) -> bool {
        self.on_sent.is_some()
    }

    /// Fires the completion callback if it has not fired yet.
    pub fn notify_sent(&mut self) {
        if let Some(callback) = self.on_sent.take() {
            callback(self);
        }
    }

    /// Hands the exchange back to the caller awaiting it.
    ///
    /// Returns false when nobody waits for it anymore.
    pub fn reply(mut self) -> bool {
        match self.reply.take() {
            Some(reply) => reply.send(self).is_ok(),
            None => false,
        }
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if self.on_sent.is_some() {
            self.fail("Exchange dropped before it was sent");
            self.notify_sent();
        }
    }
}

impl fmt::Debug for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exchange")
            .field("method", &self.request.method)
            .field("path", &self.request.path)
            .field("status", &self.status())
            .field("connection", &self.connection)
            .field("sequence", &self.sequence)
            .field("sent_pending", &self.on_sent.is_some())
            .finish()
    }
}
