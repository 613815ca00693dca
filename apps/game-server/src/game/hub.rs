//! The single serialization point for game events.
//!
//! Every inbound event (join, click, rename, leave) locks the registry,
//! mutates it and dispatches the resulting snapshot before the lock is
//! released. Snapshots therefore enter the broadcast channel in exactly the
//! order the mutations happened, whatever task produced them.

use std::sync::Arc;

use massclick_common::id::{prefix, prefixed_ulid};
use massclick_common::{AggregateState, PlayerSession, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::fanout::BroadcastHub;
use super::registry::SessionRegistry;

pub struct GameHub {
    registry: Mutex<SessionRegistry>,
    broadcast: BroadcastHub,
}

impl GameHub {
    pub fn new(broadcast_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(SessionRegistry::new()),
            broadcast: BroadcastHub::new(broadcast_capacity),
        }
    }

    /// Register a new player with a generated id.
    ///
    /// The returned receiver is subscribed before the join snapshot is
    /// dispatched, so its first message is a `gameState` that already counts
    /// the new player.
    pub fn join(&self) -> (PlayerSession, broadcast::Receiver<Arc<ServerEvent>>) {
        self.join_with_id(&prefixed_ulid(prefix::PLAYER))
    }

    pub fn join_with_id(&self, id: &str) -> (PlayerSession, broadcast::Receiver<Arc<ServerEvent>>) {
        let mut registry = self.registry.lock();
        let rx = self.broadcast.subscribe();
        let session = registry.on_connect(id);
        let snapshot = registry.snapshot();
        let count = snapshot.active_players;
        self.broadcast.dispatch(ServerEvent::GameState(snapshot));
        self.broadcast.dispatch(ServerEvent::PlayerCount(count));
        drop(registry);

        tracing::info!(player_id = %session.id, active_players = count, "player joined");
        (session, rx)
    }

    /// Count a click. Returns `false` (and dispatches nothing) when the
    /// player has already left.
    pub fn click(&self, id: &str) -> bool {
        let mut registry = self.registry.lock();
        if !registry.on_click(id) {
            tracing::debug!(player_id = %id, "click for unknown player ignored");
            return false;
        }
        self.broadcast.dispatch(ServerEvent::GameState(registry.snapshot()));
        true
    }

    /// Rename a player. Returns `false` when the player has already left.
    pub fn rename(&self, id: &str, name: String) -> bool {
        let mut registry = self.registry.lock();
        if !registry.on_rename(id, name) {
            tracing::debug!(player_id = %id, "rename for unknown player ignored");
            return false;
        }
        self.broadcast.dispatch(ServerEvent::GameState(registry.snapshot()));
        true
    }

    /// Remove a player, then push the new snapshot and the presence count.
    pub fn leave(&self, id: &str) -> bool {
        let mut registry = self.registry.lock();
        let Some(session) = registry.on_disconnect(id) else {
            return false;
        };
        let snapshot = registry.snapshot();
        let count = snapshot.active_players;
        self.broadcast.dispatch(ServerEvent::GameState(snapshot));
        self.broadcast.dispatch(ServerEvent::PlayerCount(count));
        drop(registry);

        tracing::info!(
            player_id = %session.id,
            clicks = session.clicks,
            active_players = count,
            "player left"
        );
        true
    }

    pub fn snapshot(&self) -> AggregateState {
        self.registry.lock().snapshot()
    }

    /// Subscribe without joining (observers and tests).
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ServerEvent>> {
        self.broadcast.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn next_state(rx: &mut broadcast::Receiver<Arc<ServerEvent>>) -> AggregateState {
        loop {
            match &*rx.recv().await.unwrap() {
                ServerEvent::GameState(state) => return state.clone(),
                ServerEvent::PlayerCount(_) => continue,
            }
        }
    }

    #[tokio::test]
    async fn first_message_after_join_counts_the_joiner() {
        let hub = GameHub::new(64);
        let (_a, _rx_a) = hub.join();
        let (b, mut rx_b) = hub.join();

        let first = rx_b.recv().await.unwrap();
        match &*first {
            ServerEvent::GameState(state) => {
                assert_eq!(state.active_players, 2);
                assert!(state.player(&b.id).is_some());
            }
            other => panic!("expected gameState first, got {other:?}"),
        }
        assert_eq!(*rx_b.recv().await.unwrap(), ServerEvent::PlayerCount(2));
    }

    #[tokio::test]
    async fn leave_sends_state_then_player_count() {
        let hub = GameHub::new(64);
        let (a, _rx_a) = hub.join();
        let mut observer = hub.subscribe();

        assert!(hub.leave(&a.id));
        match &*observer.recv().await.unwrap() {
            ServerEvent::GameState(state) => assert_eq!(state.active_players, 0),
            other => panic!("expected gameState, got {other:?}"),
        }
        assert_eq!(*observer.recv().await.unwrap(), ServerEvent::PlayerCount(0));
        assert!(!hub.leave(&a.id));
    }

    #[tokio::test]
    async fn orphaned_intents_dispatch_nothing() {
        let hub = GameHub::new(64);
        let (a, _rx) = hub.join();
        hub.leave(&a.id);
        let mut observer = hub.subscribe();

        assert!(!hub.rename(&a.id, "Nova".to_string()));
        assert!(!hub.click(&a.id));
        assert!(observer.try_recv().is_err());
        assert_eq!(hub.snapshot().active_players, 0);
    }

    #[tokio::test]
    async fn snapshots_from_concurrent_clickers_are_ordered() {
        let hub = Arc::new(GameHub::new(4096));
        let (_watcher, mut rx) = hub.join();
        let mut players = Vec::new();
        for _ in 0..4 {
            players.push(hub.join().0);
        }

        let mut tasks = Vec::new();
        for player in players {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    hub.click(&player.id);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut last_total = 0;
        loop {
            let state = next_state(&mut rx).await;
            assert!(state.total_clicks >= last_total);
            last_total = state.total_clicks;
            if last_total == 100 {
                break;
            }
        }
        assert_eq!(hub.snapshot().total_clicks, 100);
    }

    #[tokio::test]
    async fn end_to_end_three_players() {
        let hub = GameHub::new(256);
        let (a, mut rx_a) = hub.join();
        let (b, _rx_b) = hub.join();
        let (c, _rx_c) = hub.join();

        for _ in 0..5 {
            hub.click(&a.id);
        }
        for _ in 0..3 {
            hub.click(&b.id);
        }
        hub.rename(&c.id, "Nova".to_string());
        hub.leave(&c.id);

        let mut last = None;
        while let Ok(event) = rx_a.try_recv() {
            if let ServerEvent::GameState(state) = &*event {
                last = Some(state.clone());
            }
        }
        let last = last.unwrap();
        assert_eq!(last.total_clicks, 8);
        assert_eq!(last.active_players, 2);
        assert_eq!(last.player(&a.id).unwrap().clicks, 5);
        assert_eq!(last.player(&b.id).unwrap().clicks, 3);
        assert!(last.player(&c.id).is_none());
    }
}
