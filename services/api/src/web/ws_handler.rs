//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! The loop interleaves three event sources on one logical thread: client
//! messages, the 1-second trial tick, and timeline updates pushed back by the
//! session controller.

use crate::web::{
    protocol::{ClientMessage, ServerMessage},
    session::SessionController,
    state::AppState,
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("New WebSocket connection established.");

    let (mut sender, mut receiver) = socket.split();

    // --- 1. Initialization Phase ---
    let (lang, intent) = if let Some(Ok(Message::Text(init_json))) = receiver.next().await {
        match serde_json::from_str::<ClientMessage>(&init_json) {
            Ok(ClientMessage::Init { lang, intent }) => (lang, intent),
            Ok(_) | Err(_) => {
                warn!("First message was not a valid Init message.");
                let err_msg = ServerMessage::Error {
                    message: "Session must be initialized first.".to_string(),
                };
                let err_json = serde_json::to_string(&err_msg).unwrap();
                let _ = sender.send(Message::Text(err_json.into())).await;
                return;
            }
        }
    } else {
        warn!("Client disconnected before sending Init message.");
        return;
    };

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let controller = SessionController::connect(app_state, lang, updates_tx).await;
    info!("Session initialized with language '{}'.", lang.as_str());

    // Quick-intent shortcut from the landing page, expanded exactly once.
    if let Some(intent) = intent {
        controller.quick_intent(&intent).await;
    }

    // --- 2. Main Select Loop ---
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => {
                            // Flow tasks run detached; their results come back
                            // through the updates channel.
                            controller.handle(client_msg).await;
                        }
                        Err(e) => {
                            warn!("Failed to deserialize client message: {}", e);
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                None => {
                    info!("Client disconnected.");
                    break;
                }
            },
            _ = tick.tick() => {
                controller.tick().await;
            }
            update = updates_rx.recv() => match update {
                Some(update) => {
                    let json = serde_json::to_string(&update).unwrap();
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        warn!("Failed to push update to client. Closing session.");
                        break;
                    }
                }
                None => break,
            }
        }
    }

    // --- 3. Cleanup ---
    // Aborting the session cancels every pending flow; nothing mutates the
    // timeline past this point.
    controller.shutdown().await;
    info!("WebSocket connection closed.");
}
