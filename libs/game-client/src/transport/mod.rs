//! Transports and the connector that dials them.

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;
pub mod polling;
pub mod websocket;

use async_trait::async_trait;
use massclick_common::ClientEvent;

use crate::config::TransportKind;
use crate::error::TransportError;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{Behavior, MemoryConnector, MemoryPeer};
pub use polling::PollingTransport;
pub use websocket::WebSocketTransport;

/// One read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A JSON server message, not yet decoded.
    Message(String),
    /// Proof the server is alive with nothing to say: a WebSocket ping or an
    /// empty long poll.
    Heartbeat,
}

/// An established duplex channel to the server.
///
/// `recv` must be cancel safe: the connection manager races it against
/// commands in `tokio::select!`.
#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError>;

    /// Next message or heartbeat. Errors end the connection.
    async fn recv(&mut self) -> Result<Inbound, TransportError>;

    async fn close(&mut self);
}

/// Dials a transport against an address.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        kind: TransportKind,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// Connector for real servers: WebSocket via `tokio-tungstenite`, polling via
/// `reqwest`.
#[derive(Clone, Default)]
pub struct NetworkConnector {
    http: reqwest::Client,
}

impl NetworkConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn connect(
        &self,
        address: &str,
        kind: TransportKind,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let url = endpoint_url(address, kind)?;
        tracing::debug!(%url, transport = %kind, "dialing");
        match kind {
            TransportKind::WebSocket => Ok(Box::new(WebSocketTransport::connect(&url).await?)),
            TransportKind::Polling => {
                Ok(Box::new(PollingTransport::connect(self.http.clone(), &url).await?))
            }
        }
    }
}

/// Build the endpoint URL for `kind` from a server origin.
///
/// `http`/`ws` origins map to `ws://…/socket` and `http://…/poll`; `https`/`wss`
/// map to their secure counterparts.
pub fn endpoint_url(address: &str, kind: TransportKind) -> Result<String, TransportError> {
    let invalid = |reason: &str| TransportError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = address.trim().trim_end_matches('/');
    let (scheme, rest) = trimmed.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
    if rest.is_empty() {
        return Err(invalid("missing host"));
    }

    let secure = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => false,
        "https" | "wss" => true,
        _ => return Err(invalid("unsupported scheme")),
    };

    let url = match (kind, secure) {
        (TransportKind::WebSocket, false) => format!("ws://{rest}/socket"),
        (TransportKind::WebSocket, true) => format!("wss://{rest}/socket"),
        (TransportKind::Polling, false) => format!("http://{rest}/poll"),
        (TransportKind::Polling, true) => format!("https://{rest}/poll"),
    };
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_url_maps_schemes() {
        let ws = TransportKind::WebSocket;
        let poll = TransportKind::Polling;

        assert_eq!(endpoint_url("http://localhost:3001", ws).unwrap(), "ws://localhost:3001/socket");
        assert_eq!(endpoint_url("http://localhost:3001/", poll).unwrap(), "http://localhost:3001/poll");
        assert_eq!(endpoint_url("wss://example.com", ws).unwrap(), "wss://example.com/socket");
        assert_eq!(endpoint_url("wss://example.com", poll).unwrap(), "https://example.com/poll");
        assert_eq!(endpoint_url("HTTPS://example.com", ws).unwrap(), "wss://example.com/socket");
    }

    #[test]
    fn endpoint_url_rejects_bad_addresses() {
        for bad in ["localhost:3001", "ftp://example.com", "http://", ""] {
            assert!(
                matches!(
                    endpoint_url(bad, TransportKind::WebSocket),
                    Err(TransportError::InvalidAddress { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
    }
}
