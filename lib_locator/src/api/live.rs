//! # Live `LAST` Responder
//!
//! A request/reply protocol over one WebSocket: the client sends `LAST`, the
//! server answers with the newest geocoded position. Anything else is ignored.
//! The server never pushes on its own; the socket only closes when the peer
//! goes away or the server shuts down.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use super::routes::AppState;
use super::schema::OwnTracksPosition;

pub const LAST_COMMAND: &str = "LAST";

static NEXT_CLIENT_ID: AtomicUsize = AtomicUsize::new(1);

pub async fn ws_last(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Encodes the newest geocoded position, or `None` if there is none to send.
async fn last_as_json(state: &AppState) -> Option<String> {
    let last = match state.store.get_last().await {
        Ok(last) => last,
        Err(e) => {
            warn!(error = %e, "Could not load last location for live client.");
            return None;
        }
    };
    match serde_json::to_string(&OwnTracksPosition::from(&last)) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!(error = %e, "Error formatting location for websocket.");
            None
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    info!("Live client {} connected", client_id);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                debug!("Closing live client {} for shutdown", client_id);
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            msg = socket.recv() => {
                // Replies use the frame type of the request.
                let reply = match msg {
                    Some(Ok(Message::Text(text))) if text.as_str() == LAST_COMMAND => {
                        last_as_json(&state).await.map(|json| Message::Text(json.into()))
                    }
                    Some(Ok(Message::Binary(bytes))) if &bytes[..] == LAST_COMMAND.as_bytes() => {
                        last_as_json(&state).await.map(|json| Message::Binary(json.into_bytes().into()))
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => None,
                };
                if let Some(reply) = reply {
                    if socket.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    info!("Live client {} disconnected", client_id);
}
