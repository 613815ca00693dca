#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use game_server::config::Config;
use game_server::AppState;
use massclick_common::{AggregateState, ClientEvent, ServerEvent};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Defaults with a short long-poll wait so tests do not idle for 20 s.
pub fn test_config() -> Config {
    Config {
        port: 0,
        poll_wait: Duration::from_millis(300),
        ..Config::default()
    }
}

/// Start an actual TCP server on an ephemeral port. The server runs in the
/// background for the rest of the test.
pub async fn start_server(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config);
    let app = game_server::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

pub async fn connect_ws(addr: SocketAddr) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/socket"))
        .await
        .expect("ws connect");
    ws
}

pub async fn send_event(ws: &mut Ws, event: &ClientEvent) {
    let json = serde_json::to_string(event).unwrap();
    ws.send(Message::Text(json.into())).await.expect("send");
}

/// Next server event, skipping control frames.
pub async fn next_event(ws: &mut Ws) -> ServerEvent {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout")
            .expect("stream ended")
            .expect("read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).expect("parse event"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Next `gameState`, skipping `playerCount`.
pub async fn next_state(ws: &mut Ws) -> AggregateState {
    loop {
        if let ServerEvent::GameState(state) = next_event(ws).await {
            return state;
        }
    }
}

/// Read states until one satisfies `done`.
pub async fn state_where(ws: &mut Ws, done: impl Fn(&AggregateState) -> bool) -> AggregateState {
    loop {
        let state = next_state(ws).await;
        if done(&state) {
            return state;
        }
    }
}

/// Join over WebSocket and learn the new player's id from the join snapshot.
pub async fn join(addr: SocketAddr, known: &[&str]) -> (Ws, String) {
    let mut ws = connect_ws(addr).await;
    let state = next_state(&mut ws).await;
    let id = state
        .players
        .keys()
        .find(|id| !known.contains(&id.as_str()))
        .expect("joiner missing from its first snapshot")
        .clone();
    (ws, id)
}
