//! In-process transport, used to wire sessions together in tests

use tokio::sync::{Mutex, mpsc};

use crate::{CHANNEL_CAPACITY, Connector, TransportError, TransportLink, TransportResult};

/// Two links wired to each other: what one sends, the other receives
pub fn link_pair() -> (TransportLink, TransportLink) {
    let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);

    (
        TransportLink { tx: a_tx, rx: a_rx },
        TransportLink { tx: b_tx, rx: b_rx },
    )
}

/// Connector that hands out links supplied by the test, one per connect
pub struct MemoryConnector {
    links: Mutex<mpsc::Receiver<TransportLink>>,
}

impl MemoryConnector {
    /// Returns the connector and the handle used to feed it links
    pub fn channel() -> (Self, mpsc::Sender<TransportLink>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            Self {
                links: Mutex::new(rx),
            },
            tx,
        )
    }
}

impl Connector for MemoryConnector {
    async fn connect(&self) -> TransportResult<TransportLink> {
        self.links
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::ConnectionFailed("no more links".to_string()))
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}
