//! Global chat: the broadcast hub and the WebSocket loop that feeds it.

pub mod connection;
pub mod hub;

pub use hub::{ChatHub, ConnectionHandle, ConnectionState, Joined};
