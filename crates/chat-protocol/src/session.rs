//! Session lifecycle states

use serde::{Deserialize, Serialize};

use crate::{ProtocolError, ProtocolResult};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Keypair generated, transport opening
    Connecting,
    /// Our public key is sent, waiting for the peer's
    AwaitingPeerKey,
    /// Shared key derived, messages flow
    Ready,
    /// Transport gone, key material discarded
    Closed,
}

impl SessionState {
    /// Check that moving to `to` is allowed.
    ///
    /// States only move forward. `Closed -> Connecting` is the start of a new
    /// session instance, and any state may close.
    pub fn transition(self, to: SessionState) -> ProtocolResult<SessionState> {
        use SessionState::*;

        let allowed = matches!(
            (self, to),
            (Connecting, AwaitingPeerKey)
                | (AwaitingPeerKey, Ready)
                | (Closed, Connecting)
                | (_, Closed)
        ) || self == to;

        if allowed {
            Ok(to)
        } else {
            Err(ProtocolError::InvalidStateTransition { from: self, to })
        }
    }

    /// Coarse status shown to the user
    pub fn status(self) -> ConnectionStatus {
        match self {
            Self::Connecting => ConnectionStatus::Connecting,
            Self::AwaitingPeerKey | Self::Ready => ConnectionStatus::Online,
            Self::Closed => ConnectionStatus::Offline,
        }
    }

    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// User-visible connection indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Online,
    Offline,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Online => "online",
            Self::Offline => "offline",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        let state = SessionState::Connecting;
        let state = state.transition(SessionState::AwaitingPeerKey).unwrap();
        let state = state.transition(SessionState::Ready).unwrap();
        let state = state.transition(SessionState::Closed).unwrap();
        assert_eq!(
            state.transition(SessionState::Connecting).unwrap(),
            SessionState::Connecting
        );
    }

    #[test]
    fn test_no_going_back() {
        assert!(SessionState::Ready
            .transition(SessionState::AwaitingPeerKey)
            .is_err());
        assert!(SessionState::Connecting
            .transition(SessionState::Ready)
            .is_err());
        assert!(SessionState::Ready
            .transition(SessionState::Connecting)
            .is_err());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(SessionState::Connecting.status(), ConnectionStatus::Connecting);
        assert_eq!(SessionState::AwaitingPeerKey.status(), ConnectionStatus::Online);
        assert_eq!(SessionState::Ready.status(), ConnectionStatus::Online);
        assert_eq!(SessionState::Closed.status(), ConnectionStatus::Offline);
        assert_eq!(ConnectionStatus::Offline.to_string(), "offline");
    }
}
