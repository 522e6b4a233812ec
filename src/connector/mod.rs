//! Non-blocking connector engine.
//!
//! A [`Helper`] drives the connections of one side (client or server):
//!
//! - **`connection`**: per-peer state machine with one buffer per direction
//! - **`inbound`** / **`outbound`**: message reader and writer of a connection
//! - **`worker`**: bounded hand-off pool running read, write and handler tasks
//! - **`controller`**: periodic loop scheduling those tasks, with overload
//!   detection
//! - **`handler`**: what happens to exchanges once read or ready to write
//!
//! # Example
//!
//! ```ignore
//! use conduit::config::ConnectorConfig;
//! use conduit::connector::{Helper, ServerHandler, Side};
//! use conduit::http::Response;
//! use conduit::io::PlainTransport;
//!
//! let handler = ServerHandler::new(|_req: &_| Response::ok("hello"));
//! let helper = Helper::<PlainTransport>::new(Side::Server, ConnectorConfig::default(), handler)?;
//! helper.start()?;
//! // register accepted sockets with helper.register(PlainTransport::new(stream)?)
//! helper.stop();
//! ```

use std::fmt;

use crossbeam_queue::SegQueue;

use crate::http::Exchange;

pub mod connection;
pub mod controller;
pub mod handler;
pub mod helper;
pub mod inbound;
pub mod outbound;
pub mod worker;

pub use connection::{Connection, ConnectionState};
pub use controller::Controller;
pub use handler::{ClientHandler, MessageHandler, ServerHandler};
pub use helper::Helper;
pub use worker::{PoolSnapshot, WorkerPool};

/// Role of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Sends requests, reads responses
    Client,
    /// Reads requests, sends responses
    Server,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client-side"),
            Side::Server => f.write_str("server-side"),
        }
    }
}

/// Exchanges waiting for the controller to hand them to the handler.
#[derive(Default)]
pub struct MessageQueues {
    pub inbound: SegQueue<Exchange>,
    pub outbound: SegQueue<Exchange>,
}
