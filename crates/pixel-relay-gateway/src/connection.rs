//! Canvas WebSocket connection lifecycle: upgrade, read loop, write loop.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::{Frame, PeerId};
use crate::state::RelayState;

/// WebSocket upgrade handler for the canvas channel.
pub async fn canvas_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let permit = match &state.limiter {
        Some(limiter) => match limiter.try_acquire(addr.ip()) {
            Some(permit) => Some(permit),
            None => return StatusCode::TOO_MANY_REQUESTS.into_response(),
        },
        None => None,
    };

    let max_message = state.config.max_message_bytes();
    ws.max_message_size(max_message)
        .max_frame_size(max_message)
        .on_upgrade(move |socket| async move {
            handle_canvas_connection(state, socket, addr).await;
            drop(permit);
        })
}

async fn handle_canvas_connection(state: Arc<RelayState>, ws: WebSocket, addr: SocketAddr) {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(state.config.outbound_buffer().max(1));

    let peer_id = match state.relay.connect(Arc::new(tx)) {
        Ok(id) => id,
        Err(e) => {
            warn!(%addr, error = %e, "Failed to register canvas peer");
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    debug!(peer_id = %peer_id, %addr, "Canvas peer attached");

    // Drain the bounded queue into the socket. The queue closes when the
    // relay drops this peer, which ends the connection.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                return;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let relay = state.relay.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = ws_rx.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    relay.on_message(peer_id, text.as_str());
                }
                Ok(Message::Binary(bytes)) => {
                    relay.on_binary(peer_id, &bytes);
                }
                Ok(Message::Close(_)) => {
                    debug!(peer_id = %peer_id, "Client requested close");
                    break;
                }
                Ok(_) => {
                    // Ping/pong is answered by axum
                }
                Err(e) => {
                    debug!(peer_id = %peer_id, error = %e, "WebSocket read failed");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    close_peer(&state, peer_id);
}

fn close_peer(state: &RelayState, peer_id: PeerId) {
    if !state.relay.disconnect(peer_id) {
        debug!(peer_id = %peer_id, "Peer was already removed");
    }
}
