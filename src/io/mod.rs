//! Byte-level I/O: the reusable buffer, the processors driving it and the
//! transports feeding it.

pub mod buffer;
pub mod processor;
pub mod transport;
pub mod tunnel;

pub use buffer::{Buffer, BufferState, LineState, Transfer};
pub use processor::BufferProcessor;
pub use transport::{PlainTransport, Transport};
pub use tunnel::{TunnelSession, TunnelTransport};
