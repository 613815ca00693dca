use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use massclick_common::ClientEvent;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::TransportKind;
use crate::error::TransportError;

use super::{Inbound, Transport};

/// JSON text frames over a WebSocket.
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        let json = serde_json::to_string(&event)?;
        self.stream.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Inbound::Message(text.as_str().to_owned())),
                // tungstenite queues the pong itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => return Ok(Inbound::Heartbeat),
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "server sent close frame");
                    return Err(TransportError::ClosedByServer);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err(TransportError::ConnectionLost("stream ended".to_string())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
