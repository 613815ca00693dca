pub mod handler;
pub mod polling;
pub mod server;
