//! Command delivery to bound devices
//!
//! This module handles:
//! - Fire-and-forget sends routed through the transport registry
//! - Correlated sends that wait for the device's response
//! - The per-connection table of requests awaiting a response

mod dispatcher;
mod pending;

pub use dispatcher::{CommandDispatcher, CommandSink};
pub use pending::{PendingGuard, PendingRequests};
