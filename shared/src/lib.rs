//! Finger Bot Shared Protocol Types
//!
//! This crate provides the wire envelope, the codec for the framed-stream and
//! message transports, and the provisioning vocabulary shared by the
//! controller service and the devices.

pub mod codec;
pub mod envelope;
pub mod provisioning;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use codec::{CodecError, FrameDecoder};
pub use envelope::{Action, Envelope, Frame, Params};
pub use provisioning::{NetworkSettings, ProvisioningCommand, ProvisioningResponse};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Protocol parameters shared by both ends
pub mod protocol {
    /// Size of the big-endian length prefix on the stream transport
    pub const LENGTH_PREFIX_LEN: usize = 2;

    /// Largest payload a single stream frame can carry
    pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

    /// Parameter that carries the correlation id on the wire
    pub const CORRELATION_FIELD: &str = "req_id";

    /// Default port of the stream transport listener
    pub const DEFAULT_STREAM_PORT: u16 = 12345;

    /// Default port of the HTTP / message transport listener
    pub const DEFAULT_HTTP_PORT: u16 = 3000;

    /// Device heartbeat interval on the stream transport
    pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;

    /// How long a fresh stream connection has to identify itself
    pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;
}
