//! Session driver
//!
//! Runs the handshake state machine against a live transport. Transport
//! frames and caller commands are merged into one queue and handled one at a
//! time, so the handshake never sees two events at once. When the transport
//! drops, the session instance is discarded and a new one (with a new
//! keypair) is started after the reconnect delay.

use std::sync::Arc;

use chat_protocol::{ConnectionStatus, Frame, ProtocolError, SessionState};
use crypto_session::{CryptoError, FrameOutcome, SessionHandshake};
use net_transport::{Connector, TransportError, TransportLink, connect_with_timeout};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;

/// Session error
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Gave up after {attempts} reconnect attempts")]
    ReconnectLimitReached { attempts: u32 },
    #[error("Session closed")]
    Closed,
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Events delivered to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Coarse connection status changed
    Status(ConnectionStatus),
    /// Shared key established; messages can be sent
    Ready { fingerprint: String },
    /// A verified message from the peer
    Plaintext(String),
    /// A message the caller asked to send was not sent
    SendRejected { text: String, reason: String },
    /// The current session instance ended
    Closed { reason: Option<String> },
}

enum Command {
    Send(String),
    Close,
}

/// Caller side of a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: Arc<RwLock<SessionState>>,
}

impl SessionHandle {
    /// Queue a message for encryption and delivery
    pub async fn send(&self, text: impl Into<String>) -> SessionResult<()> {
        self.commands
            .send(Command::Send(text.into()))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Close the session; no reconnect follows
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    /// State of the current session instance
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }
}

/// Start a session on its own task
pub fn spawn<C>(
    connector: C,
    config: ClientConfig,
) -> (
    SessionHandle,
    mpsc::Receiver<ChatEvent>,
    JoinHandle<SessionResult<()>>,
)
where
    C: Connector + 'static,
{
    let (command_tx, command_rx) = mpsc::channel(100);
    let (event_tx, event_rx) = mpsc::channel(100);
    let state = Arc::new(RwLock::new(SessionState::Closed));

    let driver = SessionDriver {
        config,
        commands: command_rx,
        events: event_tx,
        state: state.clone(),
    };
    let task = tokio::spawn(driver.run(connector));

    let handle = SessionHandle {
        commands: command_tx,
        state,
    };
    (handle, event_rx, task)
}

/// How a session instance ended
enum Exit {
    /// Caller asked to close, or dropped every handle
    CloseRequested,
    /// Transport failed or the peer misbehaved; reconnect may follow
    Disconnected { established: bool },
}

struct SessionDriver {
    config: ClientConfig,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<ChatEvent>,
    state: Arc<RwLock<SessionState>>,
}

impl SessionDriver {
    async fn run<C: Connector>(mut self, connector: C) -> SessionResult<()> {
        info!("Session driver started for {}", connector.target());
        let mut failures: u32 = 0;

        loop {
            match self.run_instance(&connector).await? {
                Exit::CloseRequested => {
                    info!("Session closed by caller");
                    return Ok(());
                }
                Exit::Disconnected { established } => {
                    failures = count_failure(failures, established);
                }
            }

            if !self.config.reconnect.allows(failures) {
                warn!("Reconnect limit reached after {} attempts", failures - 1);
                return Err(SessionError::ReconnectLimitReached {
                    attempts: failures - 1,
                });
            }

            debug!("Reconnecting in {:?}", self.config.reconnect.delay);
            if !self.wait_before_reconnect().await {
                info!("Session closed while offline");
                return Ok(());
            }
        }
    }

    /// Run one session instance from keypair generation to close
    async fn run_instance<C: Connector>(&mut self, connector: &C) -> SessionResult<Exit> {
        let mut handshake = match SessionHandshake::start(self.config.key_derivation) {
            Ok(handshake) => handshake,
            Err(e) => {
                error!("Session init failed: {}", e);
                self.closed(Some(e.to_string())).await;
                return Err(e.into());
            }
        };
        self.set_state(handshake.state()).await;
        info!(session = %handshake.id(), "Connecting to {}", connector.target());

        let connect = connect_with_timeout(connector, self.config.connect_timeout);
        tokio::pin!(connect);

        let mut link = loop {
            tokio::select! {
                result = &mut connect => match result {
                    Ok(link) => break link,
                    Err(e) => {
                        warn!(session = %handshake.id(), "Connection failed: {}", e);
                        handshake.on_transport_disconnected();
                        self.closed(Some(e.to_string())).await;
                        return Ok(Exit::Disconnected { established: false });
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.reject(text, CryptoError::NotReady.to_string()).await,
                    Some(Command::Close) | None => {
                        handshake.close();
                        self.closed(None).await;
                        return Ok(Exit::CloseRequested);
                    }
                },
            }
        };

        let key_frame = handshake.on_transport_connected()?;
        if let Err(e) = link.send(key_frame.to_json()?).await {
            handshake.on_transport_disconnected();
            self.closed(Some(e.to_string())).await;
            return Ok(Exit::Disconnected { established: false });
        }
        self.set_state(handshake.state()).await;

        match self.pump(&mut handshake, &mut link).await? {
            Pumped::CloseRequested => {
                handshake.close();
                self.closed(None).await;
                Ok(Exit::CloseRequested)
            }
            Pumped::Disconnected { reason, established } => {
                handshake.on_transport_disconnected();
                // dropping the link closes our side of the transport
                drop(link);
                self.closed(Some(reason)).await;
                Ok(Exit::Disconnected { established })
            }
        }
    }

    /// Dispatch transport frames and caller commands until the instance ends
    async fn pump(
        &mut self,
        handshake: &mut SessionHandshake,
        link: &mut TransportLink,
    ) -> SessionResult<Pumped> {
        let mut established = false;

        loop {
            tokio::select! {
                frame = link.recv() => match frame {
                    Some(text) => {
                        if let Some(reason) = self.on_frame(handshake, &text).await {
                            return Ok(Pumped::Disconnected { reason, established });
                        }
                        established |= handshake.state().is_ready();
                    }
                    None => {
                        return Ok(Pumped::Disconnected {
                            reason: "transport disconnected".to_string(),
                            established,
                        });
                    }
                },
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => match handshake.encrypt(&text) {
                        Ok(frame) => {
                            if let Err(e) = link.send(frame.to_json()?).await {
                                return Ok(Pumped::Disconnected { reason: e.to_string(), established });
                            }
                        }
                        Err(e) if e.is_session_fatal() => {
                            error!(session = %handshake.id(), "Cannot encrypt: {}", e);
                            let reason = e.to_string();
                            self.reject(text, reason.clone()).await;
                            return Ok(Pumped::Disconnected { reason, established });
                        }
                        Err(e) => self.reject(text, e.to_string()).await,
                    },
                    Some(Command::Close) | None => return Ok(Pumped::CloseRequested),
                },
            }
        }
    }

    /// Handle one received frame. Returns a reason when the session must end.
    async fn on_frame(&self, handshake: &mut SessionHandshake, text: &str) -> Option<String> {
        let frame = match Frame::from_json(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(session = %handshake.id(), "Skipping frame: {}", e);
                return None;
            }
        };
        let kind = frame.kind();

        match handshake.on_frame(frame) {
            Ok(FrameOutcome::Ready { fingerprint }) => {
                self.set_state(handshake.state()).await;
                self.emit(ChatEvent::Ready { fingerprint }).await;
            }
            Ok(FrameOutcome::Plaintext(text)) => self.emit(ChatEvent::Plaintext(text)).await,
            Ok(FrameOutcome::Discarded | FrameOutcome::Ignored) => {
                debug!(session = %handshake.id(), "No action for {:?} frame", kind);
            }
            Err(e) if e.is_session_fatal() => {
                error!(session = %handshake.id(), "Handshake failed: {}", e);
                return Some(e.to_string());
            }
            Err(e) => warn!(session = %handshake.id(), "Dropping message: {}", e),
        }
        None
    }

    /// Sleep out the reconnect delay. Returns false if the caller closed meanwhile.
    async fn wait_before_reconnect(&mut self) -> bool {
        let delay = tokio::time::sleep(self.config.reconnect.delay);
        tokio::pin!(delay);

        loop {
            tokio::select! {
                _ = &mut delay => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => self.reject(text, "offline".to_string()).await,
                    Some(Command::Close) | None => return false,
                },
            }
        }
    }

    async fn set_state(&self, next: SessionState) {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            if let Err(e) = previous.transition(next) {
                warn!("{}", e);
            }
            *state = next;
            previous
        };

        if previous.status() != next.status() {
            self.emit(ChatEvent::Status(next.status())).await;
        }
    }

    async fn closed(&self, reason: Option<String>) {
        self.set_state(SessionState::Closed).await;
        self.emit(ChatEvent::Closed { reason }).await;
    }

    async fn reject(&self, text: String, reason: String) {
        debug!("Message not sent: {}", reason);
        self.emit(ChatEvent::SendRejected { text, reason }).await;
    }

    async fn emit(&self, event: ChatEvent) {
        // the caller may have stopped listening; the session keeps running
        let _ = self.events.send(event).await;
    }
}

/// Consecutive failures after an instance ends. An instance that reached
/// Ready starts the count over.
fn count_failure(failures: u32, established: bool) -> u32 {
    if established {
        1
    } else {
        failures.saturating_add(1)
    }
}

/// How the frame pump ended
enum Pumped {
    CloseRequested,
    Disconnected { reason: String, established: bool },
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crypto_session::KeyDerivation;
    use net_transport::{MemoryConnector, link_pair};

    use super::*;
    use crate::config::ReconnectPolicy;

    fn test_config() -> ClientConfig {
        ClientConfig {
            reconnect: ReconnectPolicy {
                delay: Duration::from_millis(10),
                max_attempts: None,
            },
            connect_timeout: Duration::from_secs(5),
            ..ClientConfig::default()
        }
    }

    /// Wait for the first event matching `pred`, skipping others
    async fn expect_event<F>(events: &mut mpsc::Receiver<ChatEvent>, pred: F) -> ChatEvent
    where
        F: Fn(&ChatEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn recv_frame(link: &mut TransportLink) -> Frame {
        let text = tokio::time::timeout(Duration::from_secs(5), link.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("link closed");
        Frame::from_json(&text).unwrap()
    }

    /// Complete the key exchange from the test side of `remote`.
    /// Returns the test peer and the key frame the client sent.
    async fn answer_handshake(remote: &mut TransportLink) -> (SessionHandshake, Frame) {
        let their_key = recv_frame(remote).await;
        let mut peer = SessionHandshake::start(KeyDerivation::Raw).unwrap();
        let our_key = peer.on_transport_connected().unwrap();
        remote.send(our_key.to_json().unwrap()).await.unwrap();
        assert!(matches!(
            peer.on_frame(their_key.clone()).unwrap(),
            FrameOutcome::Ready { .. }
        ));
        (peer, their_key)
    }

    #[test]
    fn test_failure_count() {
        assert_eq!(count_failure(0, false), 1);
        assert_eq!(count_failure(3, false), 4);
        assert_eq!(count_failure(3, true), 1);
        assert_eq!(count_failure(u32::MAX, false), u32::MAX);
    }

    #[tokio::test]
    async fn test_two_clients_exchange_messages() {
        let (alice_connector, alice_feed) = MemoryConnector::channel();
        let (bob_connector, bob_feed) = MemoryConnector::channel();
        let (alice_link, bob_link) = link_pair();
        alice_feed.send(alice_link).await.unwrap();
        bob_feed.send(bob_link).await.unwrap();

        let (alice, mut alice_events, _) = spawn(alice_connector, test_config());
        let (bob, mut bob_events, _) = spawn(bob_connector, test_config());

        let alice_ready = expect_event(&mut alice_events, |e| matches!(e, ChatEvent::Ready { .. })).await;
        let bob_ready = expect_event(&mut bob_events, |e| matches!(e, ChatEvent::Ready { .. })).await;
        assert_eq!(alice_ready, bob_ready);
        assert_eq!(alice.state(), SessionState::Ready);

        alice.send("hello").await.unwrap();
        let received = expect_event(&mut bob_events, |e| matches!(e, ChatEvent::Plaintext(_))).await;
        assert_eq!(received, ChatEvent::Plaintext("hello".to_string()));

        bob.send("hi alice").await.unwrap();
        let received = expect_event(&mut alice_events, |e| matches!(e, ChatEvent::Plaintext(_))).await;
        assert_eq!(received, ChatEvent::Plaintext("hi alice".to_string()));
    }

    #[tokio::test]
    async fn test_status_sequence() {
        let (connector, feed) = MemoryConnector::channel();
        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();

        let (_handle, mut events, _) = spawn(connector, test_config());
        assert_eq!(
            events.recv().await,
            Some(ChatEvent::Status(ConnectionStatus::Connecting))
        );
        assert_eq!(
            events.recv().await,
            Some(ChatEvent::Status(ConnectionStatus::Online))
        );

        let _peer = answer_handshake(&mut remote).await;
        assert!(matches!(events.recv().await, Some(ChatEvent::Ready { .. })));
    }

    #[tokio::test]
    async fn test_send_before_ready_is_rejected() {
        let (connector, feed) = MemoryConnector::channel();
        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();

        let (handle, mut events, _) = spawn(connector, test_config());
        expect_event(&mut events, |e| *e == ChatEvent::Status(ConnectionStatus::Online)).await;
        assert!(matches!(recv_frame(&mut remote).await, Frame::PublicKey { .. }));

        handle.send("too early").await.unwrap();
        let event = expect_event(&mut events, |e| matches!(e, ChatEvent::SendRejected { .. })).await;
        assert!(matches!(event, ChatEvent::SendRejected { text, .. } if text == "too early"));
        assert_eq!(handle.state(), SessionState::AwaitingPeerKey);
    }

    #[tokio::test]
    async fn test_early_data_and_junk_are_skipped() {
        let (connector, feed) = MemoryConnector::channel();
        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();

        let (_handle, mut events, _) = spawn(connector, test_config());
        let their_key = recv_frame(&mut remote).await;

        // a message under some other key, before any key frame
        let (_, mut stranger) = {
            let mut a = SessionHandshake::start(KeyDerivation::Raw).unwrap();
            let mut b = SessionHandshake::start(KeyDerivation::Raw).unwrap();
            let ka = a.on_transport_connected().unwrap();
            let kb = b.on_transport_connected().unwrap();
            a.on_frame(kb).unwrap();
            b.on_frame(ka).unwrap();
            (a, b)
        };
        let early = stranger.encrypt("early").unwrap();
        remote.send(early.to_json().unwrap()).await.unwrap();
        remote.send("not json".to_string()).await.unwrap();
        remote.send(r#"{"type":"typing"}"#.to_string()).await.unwrap();

        let mut peer = SessionHandshake::start(KeyDerivation::Raw).unwrap();
        let our_key = peer.on_transport_connected().unwrap();
        remote.send(our_key.to_json().unwrap()).await.unwrap();
        peer.on_frame(their_key).unwrap();
        remote
            .send(peer.encrypt("after").unwrap().to_json().unwrap())
            .await
            .unwrap();

        let online = expect_event(&mut events, |e| *e == ChatEvent::Status(ConnectionStatus::Online)).await;
        assert_eq!(online, ChatEvent::Status(ConnectionStatus::Online));
        // the early message never surfaces and the session stays up
        assert!(matches!(events.recv().await, Some(ChatEvent::Ready { .. })));
        assert_eq!(
            events.recv().await,
            Some(ChatEvent::Plaintext("after".to_string()))
        );
    }

    #[tokio::test]
    async fn test_tampered_message_dropped_session_kept() {
        let (connector, feed) = MemoryConnector::channel();
        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();

        let (handle, mut events, _) = spawn(connector, test_config());
        let (mut peer, _) = answer_handshake(&mut remote).await;
        expect_event(&mut events, |e| matches!(e, ChatEvent::Ready { .. })).await;

        let Frame::Message { mut payload } = peer.encrypt("tampered").unwrap() else {
            panic!("expected a data frame");
        };
        payload.iv[3] ^= 0x10;
        remote
            .send(Frame::Message { payload }.to_json().unwrap())
            .await
            .unwrap();
        remote
            .send(peer.encrypt("intact").unwrap().to_json().unwrap())
            .await
            .unwrap();

        assert_eq!(
            events.recv().await,
            Some(ChatEvent::Plaintext("intact".to_string()))
        );
        assert_eq!(handle.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_outgoing_message_reaches_peer() {
        let (connector, feed) = MemoryConnector::channel();
        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();

        let (handle, mut events, _) = spawn(connector, test_config());
        let (mut peer, _) = answer_handshake(&mut remote).await;
        expect_event(&mut events, |e| matches!(e, ChatEvent::Ready { .. })).await;

        handle.send("to the peer").await.unwrap();
        let frame = recv_frame(&mut remote).await;
        assert_eq!(
            peer.on_frame(frame).unwrap(),
            FrameOutcome::Plaintext("to the peer".to_string())
        );
    }

    #[tokio::test]
    async fn test_malformed_key_closes_and_reconnects() {
        let (connector, feed) = MemoryConnector::channel();
        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();

        let (handle, mut events, _) = spawn(connector, test_config());
        let first_key = recv_frame(&mut remote).await;
        remote
            .send(r#"{"type":"public-key","key":[4,1,2,3]}"#.to_string())
            .await
            .unwrap();

        let closed = expect_event(&mut events, |e| matches!(e, ChatEvent::Closed { .. })).await;
        assert!(matches!(closed, ChatEvent::Closed { reason: Some(_) }));
        // our side of the old link is gone
        assert_eq!(remote.recv().await, None);

        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();
        let second_key = recv_frame(&mut remote).await;
        assert_ne!(first_key, second_key);
        expect_event(&mut events, |e| *e == ChatEvent::Status(ConnectionStatus::Online)).await;
        assert_eq!(handle.state(), SessionState::AwaitingPeerKey);
    }

    #[tokio::test]
    async fn test_disconnect_then_fresh_session() {
        let (connector, feed) = MemoryConnector::channel();
        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();

        let (handle, mut events, task) = spawn(connector, test_config());
        let (_peer, first_key) = answer_handshake(&mut remote).await;
        expect_event(&mut events, |e| matches!(e, ChatEvent::Ready { .. })).await;

        drop(remote);
        expect_event(&mut events, |e| *e == ChatEvent::Status(ConnectionStatus::Offline)).await;
        let closed = expect_event(&mut events, |e| matches!(e, ChatEvent::Closed { .. })).await;
        assert_eq!(
            closed,
            ChatEvent::Closed {
                reason: Some("transport disconnected".to_string())
            }
        );

        let (link, mut remote) = link_pair();
        feed.send(link).await.unwrap();
        let second_key = recv_frame(&mut remote).await;
        assert!(matches!(second_key, Frame::PublicKey { .. }));
        assert_ne!(second_key, first_key);

        handle.close().await;
        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(handle.state(), SessionState::Closed);
        assert!(matches!(handle.send("late").await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn test_reconnect_limit() {
        let (connector, feed) = MemoryConnector::channel();
        drop(feed);

        let config = ClientConfig {
            reconnect: ReconnectPolicy {
                delay: Duration::from_millis(1),
                max_attempts: Some(2),
            },
            ..test_config()
        };
        let (_handle, _events, task) = spawn(connector, config);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(SessionError::ReconnectLimitReached { attempts: 2 })
        ));
    }

    #[tokio::test]
    async fn test_close_while_connecting() {
        let (connector, _feed) = MemoryConnector::channel();
        let (handle, mut events, task) = spawn(connector, test_config());

        expect_event(&mut events, |e| *e == ChatEvent::Status(ConnectionStatus::Connecting)).await;
        handle.close().await;

        let closed = expect_event(&mut events, |e| matches!(e, ChatEvent::Closed { .. })).await;
        assert_eq!(closed, ChatEvent::Closed { reason: None });
        assert!(task.await.unwrap().is_ok());
    }
}
