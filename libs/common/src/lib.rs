pub mod id;
pub mod protocol;

pub use protocol::{AggregateState, ClientEvent, PlayerSession, ServerEvent};
