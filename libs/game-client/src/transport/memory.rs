//! In-process connector for driving a [`ConnectionManager`](crate::ConnectionManager)
//! without a network.
//!
//! Every dial is recorded. Whether it succeeds is scripted per address and
//! transport with a [`Behavior`]. Each accepted connection hands a
//! [`MemoryPeer`] to the test, which plays the server side: it pushes events,
//! reads the intents the client sent and closes or drops the connection.
//!
//! Only built for tests and with the `test-utils` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use massclick_common::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;

use crate::config::TransportKind;
use crate::error::TransportError;
use crate::policy::Target;

use super::{Connector, Inbound, Transport};

/// How a dial against one `(address, transport)` pair resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Fail immediately.
    Refuse,
    /// Never resolve.
    Hang,
    Accept,
    /// Succeed after the given delay.
    AcceptAfter(Duration),
}

#[derive(Debug)]
struct Script {
    behaviors: HashMap<(String, TransportKind), Behavior>,
    fallback: Behavior,
    dials: Vec<Target>,
}

#[derive(Clone)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
}

impl MemoryConnector {
    /// A connector that refuses everything until told otherwise, plus the
    /// stream of accepted connections.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let script = Script {
            behaviors: HashMap::new(),
            fallback: Behavior::Refuse,
            dials: Vec::new(),
        };
        let connector = Self {
            script: Arc::new(Mutex::new(script)),
            peers,
        };
        (connector, peers_rx)
    }

    pub fn set(&self, address: &str, kind: TransportKind, behavior: Behavior) {
        self.lock()
            .behaviors
            .insert((address.to_string(), kind), behavior);
    }

    /// Behavior for pairs without an explicit entry.
    pub fn set_fallback(&self, behavior: Behavior) {
        self.lock().fallback = behavior;
    }

    /// Every dial so far, in order.
    pub fn dials(&self) -> Vec<Target> {
        self.lock().dials.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn accept(&self, target: Target) -> MemoryTransport {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));

        let transport = MemoryTransport {
            kind: target.transport,
            incoming,
            outgoing,
            closed: Arc::clone(&closed),
        };
        let peer = MemoryPeer {
            target,
            to_client,
            from_client,
            closed,
        };
        if self.peers.send(peer).is_err() {
            tracing::debug!("memory connector has no listener for accepted peers");
        }
        transport
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        address: &str,
        kind: TransportKind,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let target = Target {
            address: address.to_string(),
            transport: kind,
        };
        let behavior = {
            let mut script = self.lock();
            script.dials.push(target.clone());
            script
                .behaviors
                .get(&(target.address.clone(), kind))
                .copied()
                .unwrap_or(script.fallback)
        };

        match behavior {
            Behavior::Refuse => Err(TransportError::ConnectFailed(format!(
                "{kind} to {address} refused"
            ))),
            Behavior::Hang => std::future::pending().await,
            Behavior::Accept => Ok(Box::new(self.accept(target))),
            Behavior::AcceptAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(Box::new(self.accept(target)))
            }
        }
    }
}

#[derive(Debug)]
enum Frame {
    Text(String),
    Heartbeat,
    Close,
}

struct MemoryTransport {
    kind: TransportKind,
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: mpsc::UnboundedSender<ClientEvent>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        self.outgoing
            .send(event)
            .map_err(|_| TransportError::ConnectionLost("peer dropped".to_string()))
    }

    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        match self.incoming.recv().await {
            Some(Frame::Text(text)) => Ok(Inbound::Message(text)),
            Some(Frame::Heartbeat) => Ok(Inbound::Heartbeat),
            Some(Frame::Close) => Err(TransportError::ClosedByServer),
            None => Err(TransportError::ConnectionLost("peer dropped".to_string())),
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Server side of an accepted in-memory connection. Dropping it looks like a
/// lost connection to the client.
#[derive(Debug)]
pub struct MemoryPeer {
    target: Target,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn push(&self, event: &ServerEvent) -> Result<(), TransportError> {
        let text = serde_json::to_string(event)?;
        self.push_raw(text)
    }

    /// Deliver an arbitrary text message, well-formed or not.
    pub fn push_raw(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.to_client
            .send(Frame::Text(text.into()))
            .map_err(|_| TransportError::ConnectionLost("client dropped".to_string()))
    }

    /// Prove liveness without sending a message.
    pub fn heartbeat(&self) -> Result<(), TransportError> {
        self.to_client
            .send(Frame::Heartbeat)
            .map_err(|_| TransportError::ConnectionLost("client dropped".to_string()))
    }

    /// Close the connection from the server side.
    pub fn close(self) {
        let _ = self.to_client.send(Frame::Close);
    }

    /// Next intent from the client; `None` once the client side is gone.
    pub async fn next_intent(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    pub fn try_intent(&mut self) -> Option<ClientEvent> {
        self.from_client.try_recv().ok()
    }

    /// Whether the client closed its end deliberately.
    pub fn client_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
