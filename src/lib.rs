//! Conduit - Non-blocking HTTP connector engine
//!
//! Core library: reusable buffers, connection state machines, a controller
//! loop and a bounded worker pool moving HTTP/1.1 messages for client and
//! server connectors.

pub mod config;
pub mod connector;
pub mod error;
pub mod http;
pub mod io;
pub mod server;

pub use error::{Error, Result};
