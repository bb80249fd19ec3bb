//! WebSocket connector for the relay server
//!
//! Bridges a WebSocket connection to the channel pair of a
//! [`TransportLink`](crate::TransportLink).

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

use crate::{CHANNEL_CAPACITY, Connector, TransportError, TransportLink, TransportResult};

/// Connects to a relay at a `ws://` or `wss://` URL
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WebSocketConnector {
    async fn connect(&self) -> TransportResult<TransportLink> {
        info!("Connecting to relay: {}", self.url);

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        info!("WebSocket connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        // Session -> relay
        let (send_tx, mut send_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        // Relay -> session
        let (recv_tx, recv_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = send_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                error!("Failed to send WebSocket message: {}", e);
                                break;
                            }
                        }
                        None => {
                            debug!("Session released the link, closing socket");
                            let _ = ws_tx.close().await;
                            break;
                        }
                    },

                    incoming = ws_rx.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if recv_tx.send(text.as_str().to_owned()).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => {
                                if recv_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            info!("Relay closed connection: {:?}", frame);
                            break;
                        }
                        Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            error!("WebSocket receive error: {}", e);
                            break;
                        }
                        None => break,
                    },
                }
            }
            info!("Relay connection loop ended");
        });

        Ok(TransportLink {
            tx: send_tx,
            rx: recv_rx,
        })
    }

    fn target(&self) -> String {
        self.url.clone()
    }
}
