//! Crypto session error types

use thiserror::Error;

/// Cryptographic operation error
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid peer key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("Key derivation failed: {0}")]
    Derivation(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: authentication tag mismatch")]
    AuthenticationFailure,

    #[error("Invalid nonce length: expected {expected}, got {actual}")]
    InvalidNonceLength { expected: usize, actual: usize },

    #[error("Message limit for this key exceeded")]
    MessageLimitExceeded,

    #[error("Session not established")]
    NotReady,

    #[error("Session closed")]
    SessionClosed,
}

impl CryptoError {
    /// Whether the error ends the session.
    ///
    /// A message that fails to authenticate is dropped on its own; every
    /// other failure tears the session down.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            Self::AuthenticationFailure | Self::InvalidNonceLength { .. } | Self::NotReady
        )
    }
}

pub type CryptoResult<T> = Result<T, CryptoError>;
