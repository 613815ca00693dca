//! Broadcast hub for pushing game snapshots to connected sessions.
//!
//! Uses a single `tokio::sync::broadcast` channel. Each connection
//! subscribes once and forwards everything it receives to its transport.

use std::sync::Arc;

use massclick_common::ServerEvent;
use tokio::sync::broadcast;

/// Fan-out channel for server events. Cloneable; every clone shares the
/// same underlying channel.
#[derive(Clone)]
pub struct BroadcastHub {
    sender: broadcast::Sender<Arc<ServerEvent>>,
}

impl BroadcastHub {
    /// Receivers that fall more than `capacity` events behind skip the
    /// missed events (`RecvError::Lagged`).
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to the channel. Each connection calls this once.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.sender.subscribe()
    }

    /// Push an event to every subscriber. Never blocks.
    pub fn dispatch(&self, event: ServerEvent) {
        // send() returns Err if there are no receivers, which is fine.
        let _ = self.sender.send(Arc::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_reaches_every_subscriber_in_order() {
        let hub = BroadcastHub::new(16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.dispatch(ServerEvent::PlayerCount(1));
        hub.dispatch(ServerEvent::PlayerCount(2));

        for rx in [&mut a, &mut b] {
            assert_eq!(*rx.recv().await.unwrap(), ServerEvent::PlayerCount(1));
            assert_eq!(*rx.recv().await.unwrap(), ServerEvent::PlayerCount(2));
        }
    }

    #[test]
    fn dispatch_without_subscribers_is_ok() {
        let hub = BroadcastHub::new(4);
        hub.dispatch(ServerEvent::PlayerCount(0));

        // A late subscriber only sees what comes after it.
        let mut late = hub.subscribe();
        assert!(matches!(
            late.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn slow_receiver_lags_without_blocking_dispatch() {
        let hub = BroadcastHub::new(2);
        let mut slow = hub.subscribe();
        for n in 0..5 {
            hub.dispatch(ServerEvent::PlayerCount(n));
        }
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        assert_eq!(*slow.recv().await.unwrap(), ServerEvent::PlayerCount(3));
    }
}
