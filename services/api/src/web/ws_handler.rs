//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! It owns the connection's room subscriptions and dispatches client messages.

use crate::web::{
    hub::{booth_channel, user_channel, GLOBAL_CHANNEL},
    protocol::{ClientMessage, ServerMessage},
    state::{AppState, ConnectionState},
    timer_task::publish_timer,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    Extension,
};
use boothnow_core::EngineError;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Route of the WebSocket upgrade.
pub const WS_PATH: &str = "/ws";

const OUTBOUND_BUFFER: usize = 64;
const MAX_ROOMS_PER_CONNECTION: usize = 128;

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state, user_id))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>, user_id: Uuid) {
    info!("New WebSocket connection established for user: {}", user_id);

    // All outbound frames funnel through one writer task so room forwarders
    // and direct replies never contend for the sink.
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let writer = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let mut conn = ConnectionState::new(user_id);
    join_room(&app_state, &mut conn, GLOBAL_CHANNEL.to_string(), &out_tx).await;

    // --- Main Message Loop ---
    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                handle_text_message(text.as_str(), &app_state, &mut conn, &out_tx).await;
            }
            Ok(Message::Close(_)) => {
                info!("Client sent close message.");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error for user {}: {}", user_id, e);
                break;
            }
        }
    }

    // --- Cleanup ---
    conn.shutdown();
    drop(out_tx);
    writer.abort();
    app_state.hub.prune().await;
    debug!(
        "{} broadcast channels remain open",
        app_state.hub.channel_count().await
    );
    info!("WebSocket connection closed for user: {}", user_id);
}

/// Subscribes the connection to `room` and spawns its forwarder.
async fn join_room(
    app_state: &AppState,
    conn: &mut ConnectionState,
    room: String,
    out_tx: &mpsc::Sender<ServerMessage>,
) {
    if conn.room_count() >= MAX_ROOMS_PER_CONNECTION && !conn.is_in(&room) {
        let _ = out_tx
            .send(ServerMessage::Error {
                message: "Too many rooms joined on this connection.".to_string(),
            })
            .await;
        return;
    }
    if !conn.join(&room) {
        let _ = out_tx.send(ServerMessage::Joined { room }).await;
        return;
    }

    let mut rx = app_state.hub.subscribe(&room).await;
    let out = out_tx.clone();
    let room_name = room.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if out.send(msg).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber on {} lagged, skipped {} messages", room_name, skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    conn.track(forwarder);
    let _ = out_tx.send(ServerMessage::Joined { room }).await;
}

/// Helper function to handle the logic for different `ClientMessage` variants.
async fn handle_text_message(
    text: &str,
    app_state: &Arc<AppState>,
    conn: &mut ConnectionState,
    out_tx: &mpsc::Sender<ServerMessage>,
) {
    let client_msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!("Failed to deserialize client message: {}", e);
            let _ = out_tx
                .send(ServerMessage::Error {
                    message: "Unrecognised message.".to_string(),
                })
                .await;
            return;
        }
    };

    match client_msg {
        ClientMessage::JoinUserRoom { user_id } => {
            if user_id != conn.user_id {
                warn!("User {} tried to join the room of user {}", conn.user_id, user_id);
                let _ = out_tx
                    .send(ServerMessage::Error {
                        message: "Cannot join another user's room.".to_string(),
                    })
                    .await;
                return;
            }
            join_room(app_state, conn, user_channel(user_id), out_tx).await;
        }
        ClientMessage::JoinBoothRoom { booth_id } => {
            join_room(app_state, conn, booth_channel(booth_id), out_tx).await;
        }
        ClientMessage::SessionTimerUpdate {
            session_id,
            user_id,
        } => {
            if user_id != conn.user_id {
                warn!(
                    "Timer update for session {} names user {}, connection belongs to {}",
                    session_id, user_id, conn.user_id
                );
                return;
            }
            publish_timer(app_state, session_id, user_id).await;
        }
        ClientMessage::SessionEnd {
            session_id,
            user_id,
        } => {
            if user_id != conn.user_id {
                let _ = out_tx
                    .send(ServerMessage::Error {
                        message: format!("Session {} not found", session_id),
                    })
                    .await;
                return;
            }
            match app_state.engine.end(session_id, user_id, None).await {
                Ok(receipt) => {
                    info!(
                        "Session {} ended over WebSocket, charged {:.2} {}",
                        session_id, receipt.amount, receipt.currency
                    );
                    // Subscribers of the user room already got it from the hub.
                    if !conn.is_in(&user_channel(user_id)) {
                        let _ = out_tx
                            .send(ServerMessage::SessionEnded {
                                session_id,
                                message: format!(
                                    "Session ended. Total charged: {:.2}",
                                    receipt.amount
                                ),
                            })
                            .await;
                    }
                }
                Err(e) => {
                    let _ = out_tx
                        .send(ServerMessage::Error {
                            message: client_facing(&e),
                        })
                        .await;
                }
            }
        }
    }
}

fn client_facing(err: &EngineError) -> String {
    match err {
        EngineError::Upstream(detail) => {
            error!("Session end failed upstream: {}", detail);
            "An internal error occurred. Please try again later.".to_string()
        }
        other => other.to_string(),
    }
}
