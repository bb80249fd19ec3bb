//! Two-party rooms
//!
//! A room pairs at most two sockets and forwards frames between them. Frames
//! are opaque here; the relay cannot read them and does not try.

use std::collections::VecDeque;

use axum::extract::ws::{CloseFrame, Message, close_code};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Peers allowed in one room
pub const ROOM_CAPACITY: usize = 2;

/// Connected socket handle
pub struct RelayPeer {
    pub id: Uuid,
    pub tx: mpsc::Sender<Message>,
}

/// What happened to a routed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Delivered to the partner's socket queue
    Forwarded,
    /// Held until a partner joins
    Queued,
    /// Sender unknown, or the partner is not keeping up
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("room is full")]
pub struct RoomFull;

pub struct Room {
    peers: Vec<RelayPeer>,
    /// Frames from a lone peer, waiting for its partner
    backlog: VecDeque<Message>,
    backlog_limit: usize,
}

impl Room {
    pub fn new(backlog_limit: usize) -> Self {
        Self {
            peers: Vec::with_capacity(ROOM_CAPACITY),
            backlog: VecDeque::new(),
            backlog_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Add a peer and hand it anything its partner sent while alone
    pub fn join(&mut self, peer: RelayPeer) -> Result<(), RoomFull> {
        if self.peers.len() >= ROOM_CAPACITY {
            return Err(RoomFull);
        }

        for frame in self.backlog.drain(..) {
            if peer.tx.try_send(frame).is_err() {
                warn!("Dropping backlog frame for {}", peer.id);
            }
        }

        self.peers.push(peer);
        Ok(())
    }

    /// Forward a frame from `from` to the other peer
    pub fn route(&mut self, from: Uuid, frame: Message) -> Routed {
        if !self.peers.iter().any(|p| p.id == from) {
            return Routed::Dropped;
        }

        match self.peers.iter().find(|p| p.id != from) {
            Some(partner) => match partner.tx.try_send(frame) {
                Ok(()) => Routed::Forwarded,
                Err(e) => {
                    warn!("Partner {} not accepting frames: {}", partner.id, e);
                    Routed::Dropped
                }
            },
            None => {
                if self.backlog.len() >= self.backlog_limit {
                    self.backlog.pop_front();
                }
                self.backlog.push_back(frame);
                Routed::Queued
            }
        }
    }

    /// Remove a peer. Its partner is disconnected too, so both sides start a
    /// fresh handshake; sessions cannot re-key in place.
    pub fn leave(&mut self, id: Uuid) {
        let before = self.peers.len();
        self.peers.retain(|p| p.id != id);
        if self.peers.len() == before {
            return;
        }

        self.backlog.clear();
        for partner in self.peers.drain(..) {
            debug!("Closing partner {} after {} left", partner.id, id);
            let _ = partner.tx.try_send(close_message(close_code::NORMAL, "peer left"));
        }
    }
}

pub fn close_message(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
