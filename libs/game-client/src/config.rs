use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::policy::Backoff;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Underlying duplex channel used to reach the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Low-latency WebSocket (`/socket`).
    WebSocket,
    /// HTTP long-polling (`/poll`), for networks that block WebSockets.
    Polling,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => f.write_str("websocket"),
            Self::Polling => f.write_str("polling"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::WebSocket),
            "polling" | "poll" => Ok(Self::Polling),
            other => Err(format!("unknown transport: {other}")),
        }
    }
}

/// Configuration for a [`ConnectionManager`](crate::ConnectionManager).
///
/// Only the primary address is required. Addresses are server origins such as
/// `http://localhost:3001` or `wss://example.com`; the transport-specific path
/// is appended when dialing.
///
/// ```
/// use game_client::{ClientConfig, TransportKind};
///
/// let config = ClientConfig::new("http://localhost:3001")
///     .with_backup_address("http://backup:3001")
///     .with_transport_order(vec![TransportKind::Polling]);
/// assert_eq!(config.addresses().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub primary_address: String,
    pub backup_address: Option<String>,
    pub fallback_address: Option<String>,
    /// Transports tried, in order, for every address.
    pub transport_order: Vec<TransportKind>,
    /// Time a transport attempt gets before the next one is started.
    pub connect_timeout: Duration,
    /// Silence after which an established connection counts as lost. The
    /// server pings every 25 s and answers empty long polls after 20 s.
    pub heartbeat_timeout: Duration,
    /// Reconnection rounds after an established connection drops.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnection round; doubles each round.
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
    /// Random spread applied to reconnect delays, `0.0..=1.0`.
    pub reconnect_jitter: f64,
    /// When the consumer falls behind, state updates beyond this many are
    /// dropped with a warning. Connection changes are always delivered.
    pub event_channel_capacity: usize,
    /// Grace period for [`ConnectionManager::shutdown`](crate::ConnectionManager::shutdown)
    /// before the background task is aborted.
    pub shutdown_timeout: Duration,
    /// Skip networking entirely and play offline.
    pub offline_only: bool,
}

impl ClientConfig {
    pub fn new(primary_address: impl Into<String>) -> Self {
        Self {
            primary_address: primary_address.into(),
            backup_address: None,
            fallback_address: None,
            transport_order: vec![TransportKind::WebSocket, TransportKind::Polling],
            connect_timeout: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(45),
            max_reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(5),
            reconnect_jitter: 0.5,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: Duration::from_secs(1),
            offline_only: false,
        }
    }

    #[must_use]
    pub fn with_backup_address(mut self, address: impl Into<String>) -> Self {
        self.backup_address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_fallback_address(mut self, address: impl Into<String>) -> Self {
        self.fallback_address = Some(address.into());
        self
    }

    /// Set the transport preference order. Duplicates are removed; an empty
    /// list keeps the current order.
    #[must_use]
    pub fn with_transport_order(mut self, order: Vec<TransportKind>) -> Self {
        let mut deduped = Vec::with_capacity(order.len());
        for kind in order {
            if !deduped.contains(&kind) {
                deduped.push(kind);
            }
        }
        if !deduped.is_empty() {
            self.transport_order = deduped;
        }
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, max_attempts: u32, delay: Duration, delay_max: Duration) -> Self {
        self.max_reconnect_attempts = max_attempts;
        self.reconnect_delay = delay;
        self.reconnect_delay_max = delay_max.max(delay);
        self
    }

    /// Values outside `0.0..=1.0` are clamped.
    #[must_use]
    pub fn with_reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) };
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn offline_only(mut self) -> Self {
        self.offline_only = true;
        self
    }

    /// Configured addresses in escalation order: primary, backup, fallback.
    pub fn addresses(&self) -> Vec<String> {
        std::iter::once(self.primary_address.clone())
            .chain(self.backup_address.clone())
            .chain(self.fallback_address.clone())
            .collect()
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.reconnect_delay, self.reconnect_delay_max, self.reconnect_jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ClientConfig::new("http://localhost:3001");
        assert_eq!(config.addresses(), vec!["http://localhost:3001".to_string()]);
        assert_eq!(
            config.transport_order,
            vec![TransportKind::WebSocket, TransportKind::Polling]
        );
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(45));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert!(!config.offline_only);
    }

    #[test]
    fn addresses_follow_escalation_order() {
        let config = ClientConfig::new("p")
            .with_fallback_address("f")
            .with_backup_address("b");
        assert_eq!(config.addresses(), vec!["p", "b", "f"]);
    }

    #[test]
    fn transport_order_is_deduplicated_and_never_empty() {
        let config = ClientConfig::new("p").with_transport_order(vec![
            TransportKind::Polling,
            TransportKind::Polling,
            TransportKind::WebSocket,
        ]);
        assert_eq!(
            config.transport_order,
            vec![TransportKind::Polling, TransportKind::WebSocket]
        );

        let config = config.with_transport_order(Vec::new());
        assert_eq!(config.transport_order.len(), 2);
    }

    #[test]
    fn transport_kind_parses() {
        assert_eq!("WebSocket".parse::<TransportKind>(), Ok(TransportKind::WebSocket));
        assert_eq!(" poll ".parse::<TransportKind>(), Ok(TransportKind::Polling));
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Polling.to_string(), "polling");
    }

    #[test]
    fn clamps() {
        let config = ClientConfig::new("p")
            .with_event_channel_capacity(0)
            .with_reconnect_jitter(7.0)
            .with_reconnect(3, Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.reconnect_jitter, 1.0);
        assert_eq!(config.reconnect_delay_max, Duration::from_secs(2));
    }
}
