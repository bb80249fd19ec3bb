//! Per-message authenticated encryption with AES-256-GCM

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use chat_protocol::{EnvelopePayload, Frame};
use rand::{RngCore, rngs::OsRng};

use crate::{CryptoError, CryptoResult, NONCE_SIZE, SharedKey, TAG_SIZE};

/// Encryptions allowed under one key with random 96-bit nonces
pub const MAX_MESSAGES_PER_KEY: u64 = 1 << 32;

/// One encrypted message: a fresh nonce and the ciphertext with its tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl EncryptedEnvelope {
    /// Validate a payload received off the wire
    pub fn from_payload(payload: EnvelopePayload) -> CryptoResult<Self> {
        let nonce: [u8; NONCE_SIZE] =
            payload
                .iv
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidNonceLength {
                    expected: NONCE_SIZE,
                    actual: payload.iv.len(),
                })?;

        Ok(Self {
            nonce,
            ciphertext: payload.data,
        })
    }

    pub fn into_payload(self) -> EnvelopePayload {
        EnvelopePayload {
            iv: self.nonce.to_vec(),
            data: self.ciphertext,
        }
    }

    /// Wrap in a data frame ready for the transport
    pub fn into_frame(self) -> Frame {
        Frame::message(self.nonce, self.ciphertext)
    }
}

/// Cipher bound to one shared key
///
/// Encryption takes `&mut self`: nonces for a key are drawn one at a time
/// and the message count is tracked against [`MAX_MESSAGES_PER_KEY`].
pub struct CipherSession {
    cipher: Aes256Gcm,
    sent: u64,
}

impl CipherSession {
    /// Create a cipher from a derived shared key
    pub fn new(key: &SharedKey) -> Self {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
        Self { cipher, sent: 0 }
    }

    /// Encrypt with a fresh random nonce and no associated data
    pub fn encrypt(&mut self, plaintext: &[u8]) -> CryptoResult<EncryptedEnvelope> {
        if self.sent >= MAX_MESSAGES_PER_KEY {
            return Err(CryptoError::MessageLimitExceeded);
        }

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        self.sent += 1;

        Ok(EncryptedEnvelope { nonce, ciphertext })
    }

    /// Decrypt and verify an envelope
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> CryptoResult<Vec<u8>> {
        if envelope.ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::AuthenticationFailure);
        }

        self.cipher
            .decrypt(
                Nonce::from_slice(&envelope.nonce),
                envelope.ciphertext.as_slice(),
            )
            .map_err(|_| CryptoError::AuthenticationFailure)
    }

    /// Messages encrypted so far under this key
    pub fn sent_count(&self) -> u64 {
        self.sent
    }

    #[cfg(test)]
    pub(crate) fn set_sent_count(&mut self, sent: u64) {
        self.sent = sent;
    }
}
