//! Server entry: accepts peer sockets for a server-side helper.

pub mod listener;

pub use listener::{bind, Listener};
