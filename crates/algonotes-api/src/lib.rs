//! HTTP surface: session endpoints, the note store and its handlers, and
//! the chat upgrade.

pub mod auth;
pub mod chat;
pub mod error;
pub mod middleware;
pub mod notes;
