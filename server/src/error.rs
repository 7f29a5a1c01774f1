//! Error taxonomy for command delivery and scheduling

use fingerbot_shared::CodecError;
use thiserror::Error;

use crate::session::TransportKind;

/// Why a command could not be delivered (or answered)
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No binding exists for the device
    #[error("Device not connected: {0}")]
    Offline(String),

    /// The bound transport failed while writing; the binding has been torn down
    #[error("Transport error: {0}")]
    Transport(String),

    /// No correlated response arrived before the deadline
    #[error("Timed out waiting for response")]
    TimedOut,

    /// The connection closed while a correlated response was outstanding
    #[error("Connection closed before a response arrived")]
    Disconnected,

    /// Correlated sends need the framed stream transport
    #[error("Correlated requests are not supported on the {0} transport")]
    Unsupported(TransportKind),

    /// The envelope could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl DispatchError {
    /// Failures that mean the binding itself is broken
    pub fn is_transport(&self) -> bool {
        matches!(self, DispatchError::Transport(_))
    }

    /// Short machine-readable label, used in API replies and logs
    pub fn label(&self) -> &'static str {
        match self {
            DispatchError::Offline(_) => "offline",
            DispatchError::Transport(_) => "error",
            DispatchError::TimedOut => "timeout",
            DispatchError::Disconnected => "disconnected",
            DispatchError::Unsupported(_) => "unsupported",
            DispatchError::Codec(_) => "invalid",
        }
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Transport(err.to_string())
    }
}

/// Why a schedule record could not be armed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// `time` is not a valid `HH:MM` time of day
    #[error("Invalid time of day: {0:?}")]
    InvalidTime(String),

    /// `action` is not part of the command vocabulary
    #[error("Unknown action: {0:?}")]
    UnknownAction(String),

    /// The configured zone is not a known IANA name
    #[error("Unknown time zone: {0:?}")]
    InvalidTimezone(String),

    /// The engine has been shut down and arms nothing further
    #[error("Schedule engine is stopped")]
    Stopped,
}
