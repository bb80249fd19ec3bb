//! Frame definitions for the relay wire protocol
//!
//! Frames are JSON objects tagged by `type`. Byte fields are encoded as
//! JSON arrays of numbers so browser peers can build them with
//! `Array.from(new Uint8Array(..))`.

use serde::{Deserialize, Serialize};

use crate::{MAX_FRAME_SIZE, ProtocolError, ProtocolResult};

/// A single message exchanged between the two peers through the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    /// Ephemeral public key announcement, raw uncompressed P-256 point
    PublicKey { key: Vec<u8> },
    /// Encrypted chat message
    Message { payload: EnvelopePayload },
}

/// Wire form of an encrypted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopePayload {
    /// AES-GCM nonce
    pub iv: Vec<u8>,
    /// Ciphertext with the 16-byte authentication tag appended
    pub data: Vec<u8>,
}

/// Discriminant of a [`Frame`], for logging and dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    PublicKey,
    Message,
}

impl Frame {
    /// Build a key frame from an exported public key
    pub fn public_key(key: impl Into<Vec<u8>>) -> Self {
        Self::PublicKey { key: key.into() }
    }

    /// Build a data frame from an encrypted payload
    pub fn message(iv: impl Into<Vec<u8>>, data: impl Into<Vec<u8>>) -> Self {
        Self::Message {
            payload: EnvelopePayload {
                iv: iv.into(),
                data: data.into(),
            },
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Self::PublicKey { .. } => FrameKind::PublicKey,
            Self::Message { .. } => FrameKind::Message,
        }
    }

    /// Serialize to the JSON text sent over the transport
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a frame received from the transport
    pub fn from_json(text: &str) -> ProtocolResult<Self> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        Ok(serde_json::from_str(text)?)
    }
}
