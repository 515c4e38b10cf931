//! WebSocket relay: pushes hub events to dashboard sessions by room.
//!
//! Protocol:
//! → Client connects: `GET /ws?token=<jwt>`
//! ← Server sends: `{"type":"connected","user_id":"...","role":"MANAGER","rooms":["all","role:MANAGER","user:..."]}`
//! → Client sends: `{"type":"join","room":"role:TECHNICIAN"}` / `{"type":"leave","room":"all"}` / `{"type":"ping"}`
//! ← Server sends: `{"type":"joined"|"left","room":"...","rooms":[...]}` / `{"type":"pong"}`
//! ← Server pushes: `{"type":"event","event":{"seq":1,"event":{"kind":"task_created",...},...}}`
//! ← On bad input: `{"type":"error","message":"..."}`

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use vendhub_core::types::Actor;
use vendhub_notify::{Room, Subscription};

use crate::auth::authenticate;
use crate::routes::{ApiError, ApiQuery};
use crate::server::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub token: String,
}

/// WebSocket upgrade handler. The token is checked before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<WsParams>,
) -> Result<Response, ApiError> {
    let actor = authenticate(&state, &params.token)?;
    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, actor))
        .into_response())
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Join { room: String },
    Leave { room: String },
    Ping,
}

fn room_names(sub: &Subscription) -> Vec<String> {
    sub.rooms().iter().map(ToString::to_string).collect()
}

fn error_reply(message: impl std::fmt::Display) -> Value {
    json!({ "type": "error", "message": message.to_string() })
}

/// Apply one client frame to the subscription and build the reply.
fn handle_client_message(sub: &mut Subscription, text: &str) -> Value {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(m) => m,
        Err(e) => return error_reply(format!("Invalid message: {e}")),
    };
    match msg {
        ClientMessage::Ping => json!({ "type": "pong" }),
        ClientMessage::Join { room } => {
            let parsed: Room = match room.parse() {
                Ok(r) => r,
                Err(e) => return error_reply(e),
            };
            match sub.join(parsed) {
                Ok(_) => json!({ "type": "joined", "room": room, "rooms": room_names(sub) }),
                Err(e) => error_reply(e),
            }
        }
        ClientMessage::Leave { room } => {
            let parsed: Room = match room.parse() {
                Ok(r) => r,
                Err(e) => return error_reply(e),
            };
            sub.leave(&parsed);
            json!({ "type": "left", "room": room, "rooms": room_names(sub) })
        }
    }
}

/// Handle a WebSocket connection.
async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, actor: Actor) {
    let mut sub = state.hub.subscribe(&actor.user_id, actor.role);
    tracing::info!("WebSocket client connected: {} ({})", actor.user_id, actor.role);

    let welcome = json!({
        "type": "connected",
        "user_id": actor.user_id,
        "role": actor.role,
        "rooms": room_names(&sub),
    });
    if send_json(&mut socket, &welcome).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            envelope = sub.next() => {
                let Some(envelope) = envelope else { break };
                let frame = json!({ "type": "event", "event": envelope.as_ref() });
                if send_json(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_client_message(&mut sub, text.as_str());
                    if send_json(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!("WS receive error: {e}");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
    }

    tracing::info!("WebSocket client disconnected: {}", actor.user_id);
}

async fn send_json(socket: &mut WebSocket, value: &Value) -> Result<(), ()> {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .map_err(|e| {
            tracing::error!("WS send failed: {e}");
        })
}
