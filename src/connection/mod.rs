//! Connection to the controller over either transport
//!
//! This module handles:
//! - The identification handshake on every new stream connection
//! - Periodic heartbeats on the stream transport
//! - The `connect` announcement on the WebSocket transport
//! - Reconnection with exponential backoff

mod manager;
mod message;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager};
