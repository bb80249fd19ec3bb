//! Client configuration

use std::time::Duration;

use clap::Parser;
use crypto_session::KeyDerivation;

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "chat-client", about = "End-to-end encrypted two-party chat over a relay")]
pub struct Args {
    /// Relay WebSocket URL
    #[arg(long, env = "CHAT_RELAY_URL", default_value = "ws://127.0.0.1:8080/ws")]
    pub relay_url: String,

    /// Delay before reconnecting after the connection drops
    #[arg(long, env = "CHAT_RECONNECT_DELAY_MS", default_value_t = 2000)]
    pub reconnect_delay_ms: u64,

    /// Give up after this many consecutive failed reconnects
    #[arg(long, env = "CHAT_MAX_RECONNECTS")]
    pub max_reconnects: Option<u32>,

    /// Connection timeout for reaching the relay
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,

    /// Key derivation after ECDH: raw (browser-compatible) or hkdf
    #[arg(long, env = "CHAT_KDF", default_value_t = KeyDerivation::Raw)]
    pub kdf: KeyDerivation,

    /// Label printed in front of the peer's messages
    #[arg(long, default_value = "peer")]
    pub peer_label: String,
}

/// When and how often to reconnect after the transport drops
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed delay before each reconnect
    pub delay: Duration,
    /// Consecutive failed reconnects allowed; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl ReconnectPolicy {
    /// Whether another attempt may follow `failures` consecutive failures
    pub fn allows(&self, failures: u32) -> bool {
        self.max_attempts.is_none_or(|max| failures <= max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(2000),
            max_attempts: None,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: String,
    pub key_derivation: KeyDerivation,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub peer_label: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080/ws".to_string(),
            key_derivation: KeyDerivation::Raw,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            peer_label: "peer".to_string(),
        }
    }
}

impl From<Args> for ClientConfig {
    fn from(args: Args) -> Self {
        Self {
            relay_url: args.relay_url,
            key_derivation: args.kdf,
            reconnect: ReconnectPolicy {
                delay: Duration::from_millis(args.reconnect_delay_ms),
                max_attempts: args.max_reconnects,
            },
            connect_timeout: Duration::from_secs(args.connect_timeout_secs),
            peer_label: args.peer_label,
        }
    }
}
