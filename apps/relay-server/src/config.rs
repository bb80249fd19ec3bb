//! Relay configuration

use std::net::SocketAddr;

use clap::Parser;

/// Command-line arguments
#[derive(Debug, Clone, Parser)]
#[command(name = "relay-server", about = "Blind WebSocket relay pairing two chat peers per room")]
pub struct RelayConfig {
    /// Address to listen on
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Frames larger than this are dropped instead of forwarded
    #[arg(long, env = "RELAY_MAX_FRAME_BYTES", default_value_t = 64 * 1024)]
    pub max_frame_bytes: usize,

    /// Frames held for a peer that has not joined yet
    #[arg(long, env = "RELAY_BACKLOG", default_value_t = 16)]
    pub backlog: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_frame_bytes: 64 * 1024,
            backlog: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_cli() {
        let parsed = RelayConfig::try_parse_from(["relay-server"]).unwrap();
        let defaults = RelayConfig::default();
        assert_eq!(parsed.bind, defaults.bind);
        assert_eq!(parsed.max_frame_bytes, defaults.max_frame_bytes);
        assert_eq!(parsed.backlog, defaults.backlog);
    }

    #[test]
    fn test_flags_override() {
        let parsed = RelayConfig::try_parse_from([
            "relay-server",
            "--bind",
            "127.0.0.1:9000",
            "--backlog",
            "4",
        ])
        .unwrap();
        assert_eq!(parsed.bind.port(), 9000);
        assert_eq!(parsed.backlog, 4);
    }
}
