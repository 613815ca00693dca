//! Authoritative in-memory player registry and aggregate click counter.

use std::collections::HashMap;

use chrono::Utc;
use massclick_common::{AggregateState, PlayerSession};

/// All live player sessions plus the process-wide click total.
///
/// `total_clicks` is never decremented: clicks of a player that disconnects
/// stay counted even though the player leaves `sessions`. The active player
/// count is always `sessions.len()`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, PlayerSession>,
    total_clicks: u64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for a new connection.
    ///
    /// Ids are generated per connection, so a repeated id returns the
    /// existing session unchanged.
    pub fn on_connect(&mut self, id: &str) -> PlayerSession {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| PlayerSession::new(id))
            .clone()
    }

    /// Set the display name verbatim. Returns `false` if the session is gone.
    pub fn on_rename(&mut self, id: &str, name: String) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.name = name;
                true
            }
            None => false,
        }
    }

    /// Count one click for `id`. Returns `false` if the session is gone.
    pub fn on_click(&mut self, id: &str) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.clicks += 1;
                session.last_active = Utc::now();
                self.total_clicks += 1;
                true
            }
            None => false,
        }
    }

    /// Remove the session. The global total keeps its clicks.
    pub fn on_disconnect(&mut self, id: &str) -> Option<PlayerSession> {
        self.sessions.remove(id)
    }

    pub fn snapshot(&self) -> AggregateState {
        AggregateState {
            total_clicks: self.total_clicks,
            active_players: self.active_players(),
            players: self
                .sessions
                .iter()
                .map(|(id, session)| (id.clone(), session.clone()))
                .collect(),
        }
    }

    pub fn active_players(&self) -> u32 {
        u32::try_from(self.sessions.len()).unwrap_or(u32::MAX)
    }

    pub fn total_clicks(&self) -> u64 {
        self.total_clicks
    }
}
