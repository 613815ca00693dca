pub mod fanout;
pub mod hub;
pub mod registry;

pub use fanout::BroadcastHub;
pub use hub::GameHub;
pub use registry::SessionRegistry;
