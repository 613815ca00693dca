//! Client side of the shared click counter.
//!
//! [`ConnectionManager`] keeps one logical connection to the game server,
//! escalating across transports and addresses, reconnecting after drops and
//! falling back to an [`OfflineSimulator`] when no server can be reached. The
//! presentation layer only sees [`ConnectionEvent`]s and calls
//! [`ConnectionManager::submit_click`] / [`ConnectionManager::submit_name`].

pub mod config;
pub mod error;
pub mod manager;
pub mod offline;
pub mod policy;
pub mod scoreboard;
pub mod transport;

pub use config::{ClientConfig, TransportKind};
pub use error::{ClientError, TransportError};
pub use manager::{ConnectionEvent, ConnectionManager};
pub use offline::OfflineSimulator;
pub use policy::ConnectionState;
pub use scoreboard::{Milestone, Scoreboard};
pub use transport::{Connector, NetworkConnector, Transport};
