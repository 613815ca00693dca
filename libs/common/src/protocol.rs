//! Wire-format messages exchanged between game clients and the server.
//!
//! Every message is a JSON object of the form `{"event": <name>, "data": <payload>}`.
//! The same envelope is used on both the WebSocket and the long-polling transport.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Player session
// ---------------------------------------------------------------------------

/// A connected player as seen in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSession {
    pub id: String,
    pub name: String,
    pub clicks: u64,
    /// Time of the last click (creation time until the first click).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_active: DateTime<Utc>,
}

impl PlayerSession {
    /// A fresh session with zero clicks and the placeholder name for `id`.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: default_player_name(&id),
            id,
            clicks: 0,
            last_active: Utc::now(),
        }
    }
}

/// Placeholder display name derived from a session id: `Player_` followed by
/// the last four characters of the id (the random part of a ULID).
pub fn default_player_name(id: &str) -> String {
    let tail: String = {
        let chars: Vec<char> = id.chars().collect();
        let start = chars.len().saturating_sub(4);
        chars[start..].iter().collect()
    };
    format!("Player_{tail}")
}

// ---------------------------------------------------------------------------
// Aggregate snapshot
// ---------------------------------------------------------------------------

/// Full game state broadcast to clients.
///
/// `total_clicks` counts every click ever made in the server process, including
/// clicks of players that have since left, so it is always at least the sum of
/// the listed players' clicks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateState {
    pub total_clicks: u64,
    pub active_players: u32,
    pub players: BTreeMap<String, PlayerSession>,
}

impl AggregateState {
    /// Players ordered by clicks (descending), ties broken by id.
    pub fn ranking(&self) -> Vec<&PlayerSession> {
        let mut ranked: Vec<&PlayerSession> = self.players.values().collect();
        ranked.sort_by(|a, b| b.clicks.cmp(&a.clicks).then_with(|| a.id.cmp(&b.id)));
        ranked
    }

    /// Sum of clicks of the currently listed players.
    pub fn listed_clicks(&self) -> u64 {
        self.players.values().map(|p| p.clicks).sum()
    }

    pub fn player(&self, id: &str) -> Option<&PlayerSession> {
        self.players.get(id)
    }
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Intents sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Increment the sender's and the global counter by one.
    Click,
    /// Rename the sender's session.
    SetPlayerName { name: String },
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Notifications pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// Full snapshot, sent on every mutation and on join.
    GameState(AggregateState),
    /// Presence count only.
    PlayerCount(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn player(id: &str, clicks: u64) -> PlayerSession {
        PlayerSession {
            clicks,
            ..PlayerSession::new(id)
        }
    }

    #[test]
    fn default_name_uses_id_tail() {
        assert_eq!(default_player_name("ply_01HZX3ABCD"), "Player_ABCD");
        assert_eq!(default_player_name("ab"), "Player_ab");
    }

    #[test]
    fn client_events_use_event_envelope() {
        let click = serde_json::to_value(ClientEvent::Click).unwrap();
        assert_eq!(click, json!({ "event": "click" }));

        let rename = serde_json::to_value(ClientEvent::SetPlayerName {
            name: "Nova".to_string(),
        })
        .unwrap();
        assert_eq!(
            rename,
            json!({ "event": "setPlayerName", "data": { "name": "Nova" } })
        );
    }

    #[test]
    fn click_without_data_is_accepted() {
        let ev: ClientEvent = serde_json::from_str(r#"{"event":"click"}"#).unwrap();
        assert_eq!(ev, ClientEvent::Click);
    }

    #[test]
    fn game_state_uses_camel_case_fields() {
        let mut state = AggregateState {
            total_clicks: 7,
            active_players: 1,
            ..Default::default()
        };
        let p = player("ply_a", 7);
        let last_active_ms = p.last_active.timestamp_millis();
        state.players.insert(p.id.clone(), p);

        let value = serde_json::to_value(ServerEvent::GameState(state)).unwrap();
        assert_eq!(value["event"], "gameState");
        assert_eq!(value["data"]["totalClicks"], 7);
        assert_eq!(value["data"]["activePlayers"], 1);
        assert_eq!(value["data"]["players"]["ply_a"]["clicks"], 7);
        assert_eq!(value["data"]["players"]["ply_a"]["lastActive"], last_active_ms);
    }

    #[test]
    fn player_count_payload_is_bare_integer() {
        let value = serde_json::to_value(ServerEvent::PlayerCount(3)).unwrap();
        assert_eq!(value, json!({ "event": "playerCount", "data": 3 }));
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(serde_json::from_str::<ServerEvent>(r#"{"event":"bogus","data":1}"#).is_err());
    }

    #[test]
    fn ranking_sorts_by_clicks_then_id() {
        let mut state = AggregateState::default();
        for (id, clicks) in [("ply_b", 3), ("ply_a", 3), ("ply_c", 9)] {
            state.players.insert(id.to_string(), player(id, clicks));
        }
        let ids: Vec<&str> = state.ranking().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["ply_c", "ply_a", "ply_b"]);
        assert_eq!(state.listed_clicks(), 15);
    }
}
