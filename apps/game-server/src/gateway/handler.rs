//! Inbound intent dispatch shared by both transports.

use massclick_common::ClientEvent;

use crate::game::GameHub;

/// Decode one client message. Malformed input is a protocol error: callers
/// log and drop it, the connection stays open.
pub fn decode(text: &str) -> Result<ClientEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Apply a decoded intent on behalf of `player_id`.
pub fn apply(hub: &GameHub, player_id: &str, event: ClientEvent) {
    match event {
        ClientEvent::Click => {
            hub.click(player_id);
        }
        ClientEvent::SetPlayerName { name } => {
            tracing::debug!(player_id = %player_id, %name, "player renamed");
            hub.rename(player_id, name);
        }
    }
}

/// Decode and apply; protocol errors are logged and ignored.
pub fn handle_text(hub: &GameHub, player_id: &str, text: &str) {
    match decode(text) {
        Ok(event) => apply(hub, player_id, event),
        Err(e) => {
            tracing::debug!(player_id = %player_id, error = %e, "dropping malformed client message");
        }
    }
}
