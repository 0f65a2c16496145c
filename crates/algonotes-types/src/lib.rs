//! Types shared by every algonotes crate: domain models, wire formats for the
//! HTTP API and chat gateway, and the error taxonomy the core returns.

pub mod api;
pub mod error;
pub mod events;
pub mod models;
