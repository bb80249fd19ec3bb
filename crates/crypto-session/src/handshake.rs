//! Session handshake state machine
//!
//! Drives one session instance from keypair generation to an established
//! cipher. It does no I/O: the caller feeds it transport events and sends
//! whatever frames it hands back.

use chat_protocol::{EnvelopePayload, Frame, SessionState};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    CipherSession, CryptoError, CryptoResult, EncryptedEnvelope, KeyDerivation, Keypair,
    PeerPublicKey,
};

/// Key material held in each state. A cipher only exists once `Ready`.
enum Phase {
    Connecting { local: Keypair },
    AwaitingPeerKey { local: Keypair },
    Ready { local: Keypair, cipher: CipherSession },
    Closed,
}

/// Result of feeding one received frame to the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Shared key derived; the session can now carry messages
    Ready { fingerprint: String },
    /// A message decrypted and verified
    Plaintext(String),
    /// Data arrived before the key exchange finished and was dropped
    Discarded,
    /// Key frame after the session was established; re-keying is not supported
    Ignored,
}

/// One session instance: one keypair, at most one shared key
pub struct SessionHandshake {
    id: Uuid,
    derivation: KeyDerivation,
    phase: Phase,
}

impl SessionHandshake {
    /// Start a new session instance with a fresh ephemeral keypair
    pub fn start(derivation: KeyDerivation) -> CryptoResult<Self> {
        let local = Keypair::generate()?;
        let id = Uuid::new_v4();
        debug!(session = %id, "Generated ephemeral keypair");

        Ok(Self {
            id,
            derivation,
            phase: Phase::Connecting { local },
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        match self.phase {
            Phase::Connecting { .. } => SessionState::Connecting,
            Phase::AwaitingPeerKey { .. } => SessionState::AwaitingPeerKey,
            Phase::Ready { .. } => SessionState::Ready,
            Phase::Closed => SessionState::Closed,
        }
    }

    /// Transport is up: returns the key frame to send to the peer
    pub fn on_transport_connected(&mut self) -> CryptoResult<Frame> {
        let frame = Frame::public_key(self.public_key()?);

        if let Phase::Connecting { .. } = self.phase {
            if let Phase::Connecting { local } = std::mem::replace(&mut self.phase, Phase::Closed) {
                self.phase = Phase::AwaitingPeerKey { local };
            }
            info!(session = %self.id, "Transport connected, sent public key");
        }
        Ok(frame)
    }

    /// Dispatch a frame received from the peer against the current state
    pub fn on_frame(&mut self, frame: Frame) -> CryptoResult<FrameOutcome> {
        match frame {
            Frame::PublicKey { key } => self.on_key_frame(&key),
            Frame::Message { payload } => match self.phase {
                Phase::Ready { .. } => self.decrypt(payload).map(FrameOutcome::Plaintext),
                Phase::Connecting { .. } | Phase::AwaitingPeerKey { .. } => {
                    debug!(session = %self.id, "Dropping message received before key exchange");
                    Ok(FrameOutcome::Discarded)
                }
                Phase::Closed => Err(CryptoError::SessionClosed),
            },
        }
    }

    fn on_key_frame(&mut self, key: &[u8]) -> CryptoResult<FrameOutcome> {
        match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::AwaitingPeerKey { local } => match self.derive(&local, key) {
                Ok((cipher, fingerprint)) => {
                    self.phase = Phase::Ready { local, cipher };
                    info!(session = %self.id, key = %fingerprint, "Shared key established");
                    Ok(FrameOutcome::Ready { fingerprint })
                }
                Err(e) => {
                    self.phase = Phase::AwaitingPeerKey { local };
                    warn!(session = %self.id, "Rejected peer key: {}", e);
                    Err(e)
                }
            },
            ready @ Phase::Ready { .. } => {
                self.phase = ready;
                debug!(session = %self.id, "Ignoring key frame on established session");
                Ok(FrameOutcome::Ignored)
            }
            connecting @ Phase::Connecting { .. } => {
                self.phase = connecting;
                debug!(session = %self.id, "Dropping key frame received before transport connect");
                Ok(FrameOutcome::Discarded)
            }
            Phase::Closed => Err(CryptoError::SessionClosed),
        }
    }

    fn derive(&self, local: &Keypair, key: &[u8]) -> CryptoResult<(CipherSession, String)> {
        let peer = PeerPublicKey::from_bytes(key)?;
        let shared = local.derive_shared(&peer, self.derivation)?;
        Ok((CipherSession::new(&shared), shared.fingerprint()))
    }

    /// Encrypt outgoing text into a data frame
    pub fn encrypt(&mut self, text: &str) -> CryptoResult<Frame> {
        match &mut self.phase {
            Phase::Ready { cipher, .. } => Ok(cipher.encrypt(text.as_bytes())?.into_frame()),
            Phase::Closed => Err(CryptoError::SessionClosed),
            _ => Err(CryptoError::NotReady),
        }
    }

    /// Decrypt and verify an incoming payload
    pub fn decrypt(&self, payload: EnvelopePayload) -> CryptoResult<String> {
        match &self.phase {
            Phase::Ready { cipher, .. } => {
                let envelope = EncryptedEnvelope::from_payload(payload)?;
                let plaintext = cipher.decrypt(&envelope)?;
                Ok(String::from_utf8_lossy(&plaintext).into_owned())
            }
            Phase::Closed => Err(CryptoError::SessionClosed),
            _ => Err(CryptoError::NotReady),
        }
    }

    /// Our public key, while the keypair is alive
    pub fn public_key(&self) -> CryptoResult<[u8; crate::PUBLIC_KEY_SIZE]> {
        match &self.phase {
            Phase::Connecting { local }
            | Phase::AwaitingPeerKey { local }
            | Phase::Ready { local, .. } => Ok(local.public_key_bytes()),
            Phase::Closed => Err(CryptoError::SessionClosed),
        }
    }

    /// Transport dropped: discard all key material
    pub fn on_transport_disconnected(&mut self) {
        if !matches!(self.phase, Phase::Closed) {
            info!(session = %self.id, from = ?self.state(), "Transport disconnected");
        }
        self.close();
    }

    /// End the session and discard all key material
    pub fn close(&mut self) {
        self.phase = Phase::Closed;
    }
}
