pub mod config;
pub mod error;
pub mod game;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use config::Config;
use game::GameHub;
use gateway::polling::PollRegistry;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<GameHub>,
    pub polls: Arc<PollRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Fresh state with an empty game. Each call creates an independent game.
    pub fn new(config: Config) -> Self {
        Self {
            hub: Arc::new(GameHub::new(config.broadcast_capacity)),
            polls: Arc::new(PollRegistry::new()),
            config: Arc::new(config),
        }
    }
}
