use std::collections::BTreeMap;

use chrono::Utc;
use massclick_common::{AggregateState, PlayerSession};

/// Session id of the only player while offline.
pub const LOCAL_PLAYER_ID: &str = "local-player";

/// Display name used when no name was ever submitted.
pub const DEFAULT_LOCAL_NAME: &str = "You";

/// Local stand-in for the server once every address has failed.
///
/// Produces the same [`AggregateState`] shape the server broadcasts, with a
/// single player, so the presentation layer does not need to know it is
/// offline.
#[derive(Debug, Clone)]
pub struct OfflineSimulator {
    total_clicks: u64,
    player: PlayerSession,
}

impl OfflineSimulator {
    pub fn new(name: Option<String>) -> Self {
        let mut player = PlayerSession::new(LOCAL_PLAYER_ID);
        player.name = name.unwrap_or_else(|| DEFAULT_LOCAL_NAME.to_string());
        Self {
            total_clicks: 0,
            player,
        }
    }

    /// Start the global counter from the last total seen online, so the
    /// displayed value does not jump backwards.
    #[must_use]
    pub fn with_baseline_total(mut self, total: u64) -> Self {
        self.total_clicks = total;
        self
    }

    pub fn click(&mut self) -> AggregateState {
        self.player.clicks += 1;
        self.player.last_active = Utc::now();
        self.total_clicks += 1;
        self.snapshot()
    }

    pub fn rename(&mut self, name: String) -> AggregateState {
        self.player.name = name;
        self.snapshot()
    }

    pub fn snapshot(&self) -> AggregateState {
        let mut players = BTreeMap::new();
        players.insert(self.player.id.clone(), self.player.clone());
        AggregateState {
            total_clicks: self.total_clicks,
            active_players: 1,
            players,
        }
    }
}
