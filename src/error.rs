//! Error types for the connector engine.

use thiserror::Error;

use crate::http::head::ParseError;

/// Connector error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error on the underlying transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A carriage return was not immediately followed by a line feed
    #[error("Missing line feed character at the end of the line, found byte {found:#04x} instead")]
    MalformedLine { found: u8 },

    /// The message head could not be parsed
    #[error("Malformed message head: {0}")]
    Parse(#[from] ParseError),

    /// A response arrived while no request was awaiting one
    #[error("Unexpected response received on connection {0}")]
    UnexpectedResponse(u64),

    /// Invalid connector configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The connector has not been started
    #[error("Connector is not started")]
    NotStarted,
}

/// Result type for connector operations.
pub type Result<T> = std::result::Result<T, Error>;
