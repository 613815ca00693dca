//! The client's single logical connection to the game server.
//!
//! [`ConnectionManager`] is a thin handle; a background driver task owns the
//! transport and walks the connection state machine. Commands reach the
//! driver over an unbounded channel. Events come back on a bounded channel
//! returned from [`ConnectionManager::start`].
//!
//! ```rust,ignore
//! let (manager, mut events) = ConnectionManager::start(ClientConfig::new("http://localhost:3001"));
//! manager.submit_name("Nova")?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ConnectionEvent::StateUpdate(state) => render(&state),
//!         ConnectionEvent::Disconnected { reason } => show_offline_badge(&reason),
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use massclick_common::{AggregateState, ClientEvent, ServerEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, TransportKind};
use crate::error::{ClientError, TransportError};
use crate::offline::OfflineSimulator;
use crate::policy::{ConnectionState, Escalation, Step, Target};
use crate::transport::{Connector, Inbound, NetworkConnector, Transport};

/// What the presentation layer hears about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected {
        address: String,
        transport: TransportKind,
    },
    /// An established connection dropped. Reconnection is already under way.
    Disconnected { reason: String },
    /// Full replacement of the game state, from the server or the offline
    /// simulator.
    StateUpdate(AggregateState),
    PlayerCountUpdate(u32),
}

#[derive(Debug)]
enum Command {
    Click,
    Rename(String),
    Shutdown,
}

pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    task: Option<JoinHandle<()>>,
    shutdown_timeout: std::time::Duration,
}

impl ConnectionManager {
    /// Start connecting to the configured servers over the network.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(config: ClientConfig) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        Self::start_with_connector(config, Arc::new(NetworkConnector::new()))
    }

    #[must_use = "the event receiver must be used to receive events"]
    pub fn start_with_connector(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shutdown_timeout = config.shutdown_timeout;

        let driver = Driver {
            config,
            connector,
            cmd_rx,
            event_tx,
            state_tx,
            pending_name: None,
            last_name: None,
            last_total: None,
        };
        let task = tokio::spawn(driver.run());

        let manager = Self {
            cmd_tx,
            state_rx,
            task: Some(task),
            shutdown_timeout,
        };
        (manager, event_rx)
    }

    /// Send one click. Dropped while not connected; counted locally while
    /// offline.
    pub fn submit_click(&self) -> Result<(), ClientError> {
        self.send(Command::Click)
    }

    /// Rename the local player. While not connected, the latest name is kept
    /// and sent once the next connection is up.
    pub fn submit_name(&self, name: impl Into<String>) -> Result<(), ClientError> {
        self.send(Command::Rename(name.into()))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Stop the driver, closing the transport. The driver gets
    /// `shutdown_timeout` to finish before it is aborted. No events are
    /// emitted once this returns.
    pub async fn shutdown(&mut self) {
        debug!("connection manager: shutdown requested");
        let _ = self.cmd_tx.send(Command::Shutdown);

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!(error = %join_err, "connection driver failed"),
                Err(_) => {
                    warn!("connection driver did not stop in time; aborting");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!(error = %join_err, "connection driver aborted");
                    }
                }
            }
        }
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.cmd_tx
            .send(command)
            .map_err(|_| ClientError::ChannelClosed)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        // Aborting drops the transport. Polling ends its server session from
        // its own Drop; a WebSocket closes with the TCP stream.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

type Attempt = BoxFuture<'static, (Target, Result<Box<dyn Transport>, TransportError>)>;

enum Established {
    Connected(Target, Box<dyn Transport>),
    Exhausted,
    Shutdown,
}

enum Ended {
    Dropped(TransportError),
    Shutdown,
}

enum Flow {
    Continue,
    Shutdown,
}

struct Driver {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    /// Name submitted while not connected, sent once on the next connect.
    pending_name: Option<String>,
    /// Latest name submitted in any state, used by the offline simulator.
    last_name: Option<String>,
    last_total: Option<u64>,
}

impl Driver {
    async fn run(mut self) {
        debug!("connection driver started");

        if self.config.offline_only {
            info!("offline mode forced by configuration");
            self.run_offline().await;
            return;
        }

        let mut next = self.establish().await;
        loop {
            let (target, mut transport) = match next {
                Established::Connected(target, transport) => (target, transport),
                Established::Exhausted => {
                    self.run_offline().await;
                    break;
                }
                Established::Shutdown => {
                    self.set_state(ConnectionState::Disconnected);
                    break;
                }
            };

            match self.run_connected(&mut *transport).await {
                Ended::Shutdown => {
                    transport.close().await;
                    self.set_state(ConnectionState::Disconnected);
                    break;
                }
                Ended::Dropped(err) => {
                    if err.is_server_close() {
                        info!(address = %target.address, transport = %target.transport, "server closed the connection");
                    } else {
                        warn!(address = %target.address, transport = %target.transport, error = %err, "connection lost");
                    }
                    self.close_quietly(&mut *transport).await;
                    self.set_state(ConnectionState::Disconnected);
                    self.emit_change(ConnectionEvent::Disconnected {
                        reason: err.to_string(),
                    })
                    .await;
                    next = self.reconnect().await;
                }
            }
        }

        debug!("connection driver stopped");
    }

    /// Walk the escalation table once: transports in order per address,
    /// addresses in order, until one attempt succeeds.
    async fn establish(&mut self) -> Established {
        self.set_state(ConnectionState::Connecting);

        let mut escalation =
            Escalation::new(self.config.addresses(), self.config.transport_order.clone());
        let Some(first) = escalation.current() else {
            self.set_state(ConnectionState::Disconnected);
            return Established::Exhausted;
        };

        let mut attempts: FuturesUnordered<Attempt> = FuturesUnordered::new();
        attempts.push(self.dial(first));
        let window = tokio::time::sleep(self.config.connect_timeout);
        tokio::pin!(window);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    if let Flow::Shutdown = self.handle_idle(cmd) {
                        return Established::Shutdown;
                    }
                }
                Some((target, result)) = attempts.next(), if !attempts.is_empty() => {
                    match result {
                        Ok(transport) => {
                            info!(address = %target.address, transport = %target.transport, "connected");
                            self.set_state(ConnectionState::Connected);
                            self.emit_change(ConnectionEvent::Connected {
                                address: target.address.clone(),
                                transport: target.transport,
                            })
                            .await;
                            return Established::Connected(target, transport);
                        }
                        Err(err) => {
                            debug!(address = %target.address, transport = %target.transport, error = %err, "connect attempt failed");
                            if attempts.is_empty()
                                && !self.escalate(&mut escalation, &mut attempts, window.as_mut())
                            {
                                break;
                            }
                        }
                    }
                }
                () = &mut window => {
                    debug!("connect window elapsed");
                    if !self.escalate(&mut escalation, &mut attempts, window.as_mut()) {
                        break;
                    }
                }
            }
        }

        warn!("every configured server is unreachable");
        self.set_state(ConnectionState::Disconnected);
        Established::Exhausted
    }

    /// Start the next attempt. Returns `false` when nothing is left to try.
    fn escalate(
        &self,
        escalation: &mut Escalation,
        attempts: &mut FuturesUnordered<Attempt>,
        window: std::pin::Pin<&mut Sleep>,
    ) -> bool {
        match escalation.advance() {
            Step::Escalate(target) => {
                debug!(address = %target.address, transport = %target.transport, "escalating transport");
                attempts.push(self.dial(target));
            }
            Step::SwitchAddress(target) => {
                info!(address = %target.address, "switching server address");
                *attempts = FuturesUnordered::new();
                attempts.push(self.dial(target));
            }
            Step::Exhausted => return false,
        }
        window.reset(Instant::now() + self.config.connect_timeout);
        true
    }

    fn dial(&self, target: Target) -> Attempt {
        let connector = Arc::clone(&self.connector);
        Box::pin(async move {
            let result = connector.connect(&target.address, target.transport).await;
            (target, result)
        })
    }

    /// Backoff rounds of full escalation after a drop.
    async fn reconnect(&mut self) -> Established {
        let backoff = self.config.backoff();
        for attempt in 0..self.config.max_reconnect_attempts {
            let delay = backoff.delay(attempt);
            info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "reconnecting");
            if let Flow::Shutdown = self.idle_for(delay).await {
                return Established::Shutdown;
            }
            match self.establish().await {
                Established::Exhausted => continue,
                other => return other,
            }
        }
        warn!(
            attempts = self.config.max_reconnect_attempts,
            "reconnection attempts exhausted"
        );
        Established::Exhausted
    }

    async fn run_connected(&mut self, transport: &mut dyn Transport) -> Ended {
        if let Some(name) = self.pending_name.take() {
            debug!(%name, "sending queued player name");
            let event = ClientEvent::SetPlayerName { name: name.clone() };
            if let Err(err) = transport.send(event).await {
                self.pending_name = Some(name);
                return Ended::Dropped(err);
            }
        }

        let silence = tokio::time::sleep(self.config.heartbeat_timeout);
        tokio::pin!(silence);

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    let event = match cmd {
                        Some(Command::Click) => ClientEvent::Click,
                        Some(Command::Rename(name)) => {
                            self.last_name = Some(name.clone());
                            ClientEvent::SetPlayerName { name }
                        }
                        Some(Command::Shutdown) | None => return Ended::Shutdown,
                    };
                    if let Err(err) = transport.send(event.clone()).await {
                        if let ClientEvent::SetPlayerName { name } = event {
                            self.pending_name = Some(name);
                        }
                        return Ended::Dropped(err);
                    }
                }
                message = transport.recv() => match message {
                    Ok(inbound) => {
                        silence
                            .as_mut()
                            .reset(Instant::now() + self.config.heartbeat_timeout);
                        if let Inbound::Message(text) = inbound {
                            self.on_server_message(&text);
                        }
                    }
                    Err(err) => return Ended::Dropped(err),
                },
                () = &mut silence => {
                    return Ended::Dropped(TransportError::ConnectionLost(
                        "heartbeat timeout".to_string(),
                    ));
                }
            }
        }
    }

    /// Tell the server we are gone, without waiting on a dead link for long.
    async fn close_quietly(&self, transport: &mut dyn Transport) {
        if tokio::time::timeout(self.config.shutdown_timeout, transport.close())
            .await
            .is_err()
        {
            debug!("transport close timed out");
        }
    }

    fn on_server_message(&mut self, text: &str) {
        match serde_json::from_str::<ServerEvent>(text) {
            Ok(ServerEvent::GameState(state)) => {
                self.last_total = Some(state.total_clicks);
                self.emit_update(ConnectionEvent::StateUpdate(state));
            }
            Ok(ServerEvent::PlayerCount(count)) => {
                self.emit_update(ConnectionEvent::PlayerCountUpdate(count));
            }
            Err(err) => warn!(error = %err, "dropping undecodable server message"),
        }
    }

    /// Wait out `delay` while answering commands the way a disconnected
    /// client does.
    async fn idle_for(&mut self, delay: std::time::Duration) -> Flow {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return Flow::Continue,
                cmd = self.cmd_rx.recv() => {
                    if let Flow::Shutdown = self.handle_idle(cmd) {
                        return Flow::Shutdown;
                    }
                }
            }
        }
    }

    fn handle_idle(&mut self, cmd: Option<Command>) -> Flow {
        match cmd {
            Some(Command::Click) => {
                debug!("not connected, dropping click");
                Flow::Continue
            }
            Some(Command::Rename(name)) => {
                debug!(%name, "not connected, queueing player name");
                self.last_name = Some(name.clone());
                self.pending_name = Some(name);
                Flow::Continue
            }
            Some(Command::Shutdown) | None => Flow::Shutdown,
        }
    }

    async fn run_offline(&mut self) {
        self.set_state(ConnectionState::Offline);
        info!("playing offline");

        let mut simulator = OfflineSimulator::new(self.last_name.clone());
        if let Some(total) = self.last_total {
            simulator = simulator.with_baseline_total(total);
        }
        self.emit_update(ConnectionEvent::PlayerCountUpdate(1));
        self.emit_update(ConnectionEvent::StateUpdate(simulator.snapshot()));

        while let Some(cmd) = self.cmd_rx.recv().await {
            let state = match cmd {
                Command::Click => simulator.click(),
                Command::Rename(name) => simulator.rename(name),
                Command::Shutdown => break,
            };
            self.emit_update(ConnectionEvent::StateUpdate(state));
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let current = *self.state_tx.borrow();
        if current == next {
            return;
        }
        debug_assert!(
            current.can_transition_to(next),
            "illegal transition {current:?} -> {next:?}"
        );
        debug!(from = ?current, to = ?next, "connection state");
        self.state_tx.send_replace(next);
    }

    /// Game updates may be dropped when the consumer lags.
    fn emit_update(&self, event: ConnectionEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("event channel full, dropping update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("event channel closed, receiver dropped");
            }
        }
    }

    /// Connection changes are always delivered.
    async fn emit_change(&self, event: ConnectionEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("event channel closed, receiver dropped");
        }
    }
}
