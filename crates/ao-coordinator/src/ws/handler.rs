//! The `/ws` upgrade endpoint: sends an `Init` snapshot, then forwards every
//! broadcast frame until the client disconnects or falls too far behind.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use ao_protocol::ws::BroadcastFrame;

use crate::api::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let sessions = match state.sessions.list_sessions().await {
        Ok(sessions) => sessions,
        Err(err) => {
            warn!(%err, "failed to build ws init snapshot");
            return;
        }
    };

    if send_frame(&mut socket, &BroadcastFrame::Init { sessions }).await.is_err() {
        return;
    }

    let mut rx = state.hub.subscribe();
    loop {
        let frame = match rx.recv().await {
            Ok(frame) => frame,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "ws subscriber lagged, disconnecting");
                break;
            }
            Err(RecvError::Closed) => break,
        };

        if send_frame(&mut socket, &frame).await.is_err() {
            break;
        }
    }

    debug!("ws client disconnected");
}

async fn send_frame(socket: &mut WebSocket, frame: &BroadcastFrame) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(err) => {
            warn!(%err, "failed to serialize broadcast frame");
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}
