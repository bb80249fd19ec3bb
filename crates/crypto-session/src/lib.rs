//! Crypto Session - End-to-End Encryption for the relay chat
//!
//! Ephemeral P-256 ECDH key agreement, AES-256-GCM message encryption and
//! the handshake state machine that ties them to a transport session.

mod cipher;
mod error;
mod handshake;
mod key_agreement;

pub use cipher::*;
pub use error::*;
pub use handshake::*;
pub use key_agreement::*;

pub use chat_protocol::{NONCE_SIZE, PUBLIC_KEY_SIZE};

/// Authentication tag size (128 bits / 16 bytes)
pub const TAG_SIZE: usize = 16;

/// AES-256 key size (256 bits / 32 bytes)
pub const SHARED_KEY_SIZE: usize = 32;
