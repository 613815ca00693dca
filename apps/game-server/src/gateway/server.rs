//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use massclick_common::ServerEvent;
use tokio::sync::broadcast;
use tokio::time;

use crate::AppState;

use super::handler;

/// Close code sent when a client stays silent for a whole heartbeat interval.
const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4009;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

pub fn router() -> Router<AppState> {
    Router::new().route("/socket", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (ws_tx, ws_rx) = socket.split();

    let (session, broadcast_rx) = state.hub.join();
    tracing::info!(player_id = %session.id, transport = "websocket", "connection established");

    run_session(&state, &session.id, ws_tx, ws_rx, broadcast_rx).await;

    state.hub.leave(&session.id);
    tracing::info!(player_id = %session.id, transport = "websocket", "connection ended");
}

/// Main loop: apply client intents, forward broadcasts, enforce liveness.
async fn run_session(
    state: &AppState,
    player_id: &str,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut broadcast_rx: broadcast::Receiver<Arc<ServerEvent>>,
) {
    let mut heartbeat_timer = time::interval(state.config.heartbeat_interval);
    heartbeat_timer.tick().await; // First tick fires immediately; skip it.
    let mut heard_from_client = true;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        heard_from_client = true;
                        handler::handle_text(&state.hub, player_id, text.as_str());
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        heard_from_client = true;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        heard_from_client = true;
                        tracing::debug!(player_id = %player_id, "dropping binary frame");
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, player_id = %player_id, "ws read error");
                        break;
                    }
                }
            }

            result = broadcast_rx.recv() => {
                match result {
                    Ok(event) => {
                        let json = match serde_json::to_string(&*event) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!(?e, "failed to encode server event");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            player_id = %player_id,
                            skipped = n,
                            "connection lagged behind broadcast"
                        );
                        // The next snapshot supersedes the skipped ones.
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            _ = heartbeat_timer.tick() => {
                if !heard_from_client {
                    tracing::debug!(player_id = %player_id, "heartbeat timeout, closing connection");
                    let _ = send_close(&mut ws_tx, CLOSE_HEARTBEAT_TIMEOUT, "Heartbeat timeout").await;
                    break;
                }
                heard_from_client = false;
                if ws_tx.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
