//! Network Transport - message channels to the relay
//!
//! The chat session only needs an ordered, reliable, message-oriented
//! duplex channel. This crate defines that contract and provides a
//! WebSocket implementation plus an in-memory one for tests.

mod error;
mod memory;
mod transport;
mod websocket;

pub use error::*;
pub use memory::*;
pub use transport::*;
pub use websocket::*;

/// Frames buffered in each direction before senders wait
pub const CHANNEL_CAPACITY: usize = 100;
