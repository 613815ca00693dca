//! Connection state machine and reconnect policy.
//!
//! Everything here is pure: the [`ConnectionManager`](crate::ConnectionManager)
//! asks [`Escalation`] what to dial next and [`Backoff`] how long to wait, and
//! the tables can be tested without any network.

use std::time::Duration;

use rand::Rng;

use crate::config::TransportKind;

/// Connection state as seen by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal: every address and transport failed, gameplay is local.
    Offline,
}

impl ConnectionState {
    /// Whether the manager may move from `self` to `next`.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Disconnected, Offline)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }
}

/// One dial: which transport against which address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: String,
    pub transport: TransportKind,
}

/// What to do when the current connect window has elapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Start the next transport on the same address, keeping pending attempts.
    Escalate(Target),
    /// Drop pending attempts and restart the transport sequence on the next address.
    SwitchAddress(Target),
    /// Nothing left to try.
    Exhausted,
}

/// Walks the `address × transport` table in order.
#[derive(Debug, Clone)]
pub struct Escalation {
    addresses: Vec<String>,
    transports: Vec<TransportKind>,
    address: usize,
    transport: usize,
    exhausted: bool,
}

impl Escalation {
    pub fn new(addresses: Vec<String>, transports: Vec<TransportKind>) -> Self {
        let exhausted = addresses.is_empty() || transports.is_empty();
        Self {
            addresses,
            transports,
            address: 0,
            transport: 0,
            exhausted,
        }
    }

    /// The most recently selected target, or `None` once exhausted.
    pub fn current(&self) -> Option<Target> {
        if self.exhausted {
            return None;
        }
        Some(Target {
            address: self.addresses[self.address].clone(),
            transport: self.transports[self.transport],
        })
    }

    pub fn advance(&mut self) -> Step {
        if self.exhausted {
            return Step::Exhausted;
        }
        if self.transport + 1 < self.transports.len() {
            self.transport += 1;
            return self.current().map_or(Step::Exhausted, Step::Escalate);
        }
        if self.address + 1 < self.addresses.len() {
            self.address += 1;
            self.transport = 0;
            return self.current().map_or(Step::Exhausted, Step::SwitchAddress);
        }
        self.exhausted = true;
        Step::Exhausted
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// Exponential reconnect delays: `base * 2^attempt`, capped at `max`, then
/// spread by `±jitter` (still capped).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter: f64,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, jitter: f64) -> Self {
        Self {
            base,
            max: max.max(base),
            jitter: if jitter.is_nan() { 0.0 } else { jitter.clamp(0.0, 1.0) },
        }
    }

    /// Delay before reconnection round `attempt` (zero-based), without jitter.
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        if self.jitter == 0.0 || nominal.is_zero() {
            return nominal;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        nominal.mul_f64(1.0 + spread).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    fn escalation(addresses: &[&str]) -> Escalation {
        Escalation::new(
            addresses.iter().map(|a| a.to_string()).collect(),
            vec![TransportKind::WebSocket, TransportKind::Polling],
        )
    }

    fn target(address: &str, transport: TransportKind) -> Target {
        Target {
            address: address.to_string(),
            transport,
        }
    }

    #[test]
    fn transition_table() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Offline));

        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connected.can_transition_to(Offline));
        for next in [Disconnected, Connecting, Connected, Offline] {
            assert!(!Offline.can_transition_to(next), "offline must be terminal");
        }
    }

    #[test]
    fn escalates_transports_then_addresses() {
        let mut esc = escalation(&["primary", "backup", "fallback"]);
        assert_eq!(esc.current(), Some(target("primary", TransportKind::WebSocket)));

        assert_eq!(esc.advance(), Step::Escalate(target("primary", TransportKind::Polling)));
        assert_eq!(
            esc.advance(),
            Step::SwitchAddress(target("backup", TransportKind::WebSocket))
        );
        assert_eq!(esc.advance(), Step::Escalate(target("backup", TransportKind::Polling)));
        assert_eq!(
            esc.advance(),
            Step::SwitchAddress(target("fallback", TransportKind::WebSocket))
        );
        assert_eq!(esc.advance(), Step::Escalate(target("fallback", TransportKind::Polling)));
        assert_eq!(esc.advance(), Step::Exhausted);
        assert!(esc.is_exhausted());
        assert_eq!(esc.current(), None);
        assert_eq!(esc.advance(), Step::Exhausted);
    }

    #[test]
    fn single_address_single_transport() {
        let mut esc = Escalation::new(vec!["only".to_string()], vec![TransportKind::Polling]);
        assert_eq!(esc.current(), Some(target("only", TransportKind::Polling)));
        assert_eq!(esc.advance(), Step::Exhausted);
    }

    #[test]
    fn empty_tables_start_exhausted() {
        let esc = Escalation::new(Vec::new(), vec![TransportKind::WebSocket]);
        assert!(esc.is_exhausted());
        let esc = Escalation::new(vec!["a".to_string()], Vec::new());
        assert_eq!(esc.current(), None);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 0.0);
        let delays: Vec<u64> = (0..6).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5, 5]);
        assert_eq!(backoff.nominal(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn jittered_backoff_stays_in_bounds() {
        let backoff = Backoff::new(Duration::from_millis(1000), Duration::from_millis(5000), 0.5);
        for attempt in 0..8 {
            let nominal = backoff.nominal(attempt);
            for _ in 0..50 {
                let delay = backoff.delay(attempt);
                assert!(delay >= nominal.mul_f64(0.49));
                assert!(delay <= Duration::from_millis(5000));
            }
        }
    }
}
