//! RelayChat Relay Server
//!
//! Pairs two WebSocket clients per room and forwards their frames without
//! reading them.

mod config;
mod room;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade, close_code},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use clap::Parser;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::room::{RelayPeer, Room, Routed, close_message};

/// Room used by clients connecting to bare `/ws`
const DEFAULT_ROOM: &str = "default";

const MAX_ROOM_NAME_LEN: usize = 64;

/// Outbound frames queued per socket
const PEER_QUEUE_CAPACITY: usize = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_server=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    let config = RelayConfig::parse();
    info!("Starting RelayChat relay");

    let addr = config.bind;
    let app = app(AppState::new(config));

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(default_room_handler))
        .route("/ws/{room}", get(room_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Application state
#[derive(Clone)]
struct AppState {
    /// Open rooms by name
    rooms: Arc<DashMap<String, Room>>,
    config: Arc<RelayConfig>,
}

impl AppState {
    fn new(config: RelayConfig) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Serialize)]
struct Stats {
    rooms: usize,
    peers: usize,
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn stats_handler(State(state): State<AppState>) -> Json<Stats> {
    let peers = state.rooms.iter().map(|room| room.len()).sum();
    Json(Stats {
        rooms: state.rooms.len(),
        peers,
    })
}

async fn default_room_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    upgrade(ws, DEFAULT_ROOM.to_string(), state)
}

async fn room_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if !valid_room_name(&room) {
        return (StatusCode::BAD_REQUEST, "invalid room name").into_response();
    }
    upgrade(ws, room, state)
}

fn upgrade(ws: WebSocketUpgrade, room: String, state: AppState) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, room, state))
}

fn valid_room_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_ROOM_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn frame_len(frame: &Message) -> usize {
    match frame {
        Message::Text(text) => text.len(),
        Message::Binary(data) => data.len(),
        _ => 0,
    }
}

/// Handle one client socket for its whole lifetime
async fn handle_websocket(socket: WebSocket, room_name: String, state: AppState) {
    let peer_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(PEER_QUEUE_CAPACITY);

    let joined = state
        .rooms
        .entry(room_name.clone())
        .or_insert_with(|| Room::new(state.config.backlog))
        .join(RelayPeer {
            id: peer_id,
            tx: msg_tx,
        });

    if let Err(e) = joined {
        warn!("Refusing {} in room '{}': {}", peer_id, room_name, e);
        let _ = ws_tx
            .send(close_message(close_code::POLICY, "room is full"))
            .await;
        return;
    }
    info!("Peer {} joined room '{}'", peer_id, room_name);

    // Drain the peer's queue into its socket; a close frame ends the socket
    let forward_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(result) = ws_rx.next().await {
        let frame = match result {
            Ok(msg @ (Message::Text(_) | Message::Binary(_))) => msg,
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                warn!("WebSocket error from {}: {}", peer_id, e);
                break;
            }
        };

        let size = frame_len(&frame);
        if size > state.config.max_frame_bytes {
            warn!(
                "Dropping {} byte frame from {} (limit {})",
                size, peer_id, state.config.max_frame_bytes
            );
            continue;
        }

        let routed = match state.rooms.get_mut(&room_name) {
            Some(mut room) => room.route(peer_id, frame),
            None => Routed::Dropped,
        };
        debug!("Frame from {} in '{}': {:?}", peer_id, room_name, routed);
    }

    if let Some(mut room) = state.rooms.get_mut(&room_name) {
        room.leave(peer_id);
    }
    state.rooms.remove_if(&room_name, |_, room| room.is_empty());
    info!("Peer {} left room '{}'", peer_id, room_name);

    forward_task.abort();
}
