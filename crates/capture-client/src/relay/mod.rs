//! Persistent relay channels.
//!
//! - [`state`] - Connection state machine and reconnect policy
//! - [`connection`] - WebSocket session task and its event stream

pub mod connection;
pub mod state;

pub use connection::{RelayConnection, RelayEvent};
pub use state::{ConnectionState, ReconnectPolicy};
