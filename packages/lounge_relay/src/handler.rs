//! WebSocket connection handler
//!
//! One connection per browser tab. The socket is split into a sender task
//! draining the per-connection outbound queue and an input task parsing and
//! dispatching client events; `tokio::select!` ties their lifetimes
//! together, and cleanup always runs on the way out.

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use lounge_protocol::{ClientEvent, ServerEvent};

use crate::AppState;
use crate::dispatch::{ConnectionContext, disconnect_cleanup, dispatch_client_event};

/// Upgrade handler for `/ws`. Only the designated origin may open channels;
/// requests without an Origin header (CLI clients, tests) are allowed.
pub async fn websocket_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if let Some(allowed) = state.config.allowed_origin.as_deref() {
        if let Some(origin) = headers.get(header::ORIGIN) {
            if origin.to_str().map(|o| o != allowed).unwrap_or(true) {
                warn!(origin = ?origin, "Rejected channel from disallowed origin");
                return StatusCode::FORBIDDEN.into_response();
            }
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one accepted connection to completion.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    info!(conn = %connection_id, "WebSocket connection established");
    state.metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_buffer);

    // First frame: the client needs its connection id to attribute
    // membership and typing events to itself.
    if tx
        .send(ServerEvent::ConnectionEstablished {
            connection_id: connection_id.clone(),
        })
        .await
        .is_err()
    {
        warn!(conn = %connection_id, "Outbound channel closed before handshake");
    }

    let ctx = Arc::new(ConnectionContext::new(
        connection_id.clone(),
        tx.clone(),
        state.registry.clone(),
        state.metrics.clone(),
    ));

    // Task to serialize outbound events onto the socket
    let sender_task = async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize event: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    // Task to parse and dispatch inbound frames
    let ctx_input = ctx.clone();
    let tx_input = tx.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => dispatch_client_event(&ctx_input, event).await,
                        Err(e) => {
                            // Malformed payloads stop here: the sender gets
                            // an error, the room sees nothing.
                            ctx_input.metrics.malformed_event();
                            warn!(conn = %ctx_input.connection_id, "Rejected malformed event: {}", e);
                            let _ = tx_input
                                .send(ServerEvent::Error {
                                    message: format!("malformed event: {e}"),
                                })
                                .await;
                        }
                    }
                }
                Ok(Message::Close(_)) => {
                    debug!(conn = %ctx_input.connection_id, "Client closed connection");
                    break;
                }
                Err(e) => {
                    error!(conn = %ctx_input.connection_id, "WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(conn = %connection_id, "Sender task ended"),
        _ = input_task => debug!(conn = %connection_id, "Input task ended"),
    }

    disconnect_cleanup(&ctx).await;
    state.metrics.connection_closed();
    info!(conn = %connection_id, "WebSocket connection closed");
}
