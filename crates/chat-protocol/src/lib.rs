//! Shared Protocol Definitions for the relay chat
//!
//! This crate contains the wire frames, session states and error types
//! shared by the chat client and the crypto session. The relay forwards
//! frames without parsing them.

mod error;
mod frame;
mod session;

pub use error::*;
pub use frame::*;
pub use session::*;

/// Length of an AES-GCM nonce on the wire (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Length of a raw uncompressed P-256 point (0x04 || X || Y)
pub const PUBLIC_KEY_SIZE: usize = 65;

/// Largest frame, in bytes, either peer will parse
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
