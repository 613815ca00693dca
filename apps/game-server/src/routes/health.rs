use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.hub.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "activePlayers": snapshot.active_players,
        "totalClicks": snapshot.total_clicks,
    }))
}
