//! Transport contract consumed by the chat session

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::{TransportError, TransportResult};

/// An established duplex channel to the peer, through the relay.
///
/// Frames are discrete text messages delivered in order. Dropping the link
/// closes the connection; `recv` returns `None` once the remote side is gone.
#[derive(Debug)]
pub struct TransportLink {
    pub tx: mpsc::Sender<String>,
    pub rx: mpsc::Receiver<String>,
}

impl TransportLink {
    /// Queue a frame for the peer
    pub async fn send(&self, frame: String) -> TransportResult<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::ConnectionClosed("link dropped".to_string()))
    }

    /// Next frame from the peer, or `None` when disconnected
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Opens transport links. Each call is a fresh connection.
pub trait Connector: Send + Sync {
    fn connect(&self) -> impl Future<Output = TransportResult<TransportLink>> + Send;

    /// Human-readable target, for logs
    fn target(&self) -> String;
}

/// Connect, giving up after `timeout`
pub async fn connect_with_timeout<C: Connector>(
    connector: &C,
    timeout: Duration,
) -> TransportResult<TransportLink> {
    match tokio::time::timeout(timeout, connector.connect()).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}
