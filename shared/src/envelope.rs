//! Command envelope and the closed action vocabulary
//!
//! Every controller/device exchange is an [`Envelope`]: an action name plus a
//! parameter map. The optional correlation id is carried on the wire as
//! `params.req_id` but lives in its own field here so callers never have to
//! fish it out of the map.

use serde_json::{Map, Value};
use std::fmt;

/// Parameter map carried by an envelope
pub type Params = Map<String, Value>;

/// Known actions, plus a catch-all for names this build does not understand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    /// Controller -> device: perform the actuation
    Press,
    /// Device -> controller: outcome of a press
    PressResult,
    /// Keepalive request (either direction)
    Ping,
    /// Keepalive reply
    Pong,
    /// Device announcement on the message transport
    Connect,
    /// Unsolicited liveness message from a device
    Heartbeat,
    /// Any other action name, kept verbatim
    Unknown(String),
}

impl Action {
    /// Map a wire name onto the vocabulary. Never fails.
    pub fn from_name(name: &str) -> Self {
        match name {
            "press" => Action::Press,
            "press_result" => Action::PressResult,
            "ping" => Action::Ping,
            "pong" => Action::Pong,
            "connect" => Action::Connect,
            "heartbeat" => Action::Heartbeat,
            other => Action::Unknown(other.to_string()),
        }
    }

    /// Wire name of this action
    pub fn name(&self) -> &str {
        match self {
            Action::Press => "press",
            Action::PressResult => "press_result",
            Action::Ping => "ping",
            Action::Pong => "pong",
            Action::Connect => "connect",
            Action::Heartbeat => "heartbeat",
            Action::Unknown(name) => name,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Action::Unknown(_))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single command or response exchanged with a device
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub action: Action,
    pub params: Params,
    pub correlation_id: Option<String>,
}

impl Envelope {
    /// Envelope with no parameters
    pub fn new(action: Action) -> Self {
        Self {
            action,
            params: Params::new(),
            correlation_id: None,
        }
    }

    pub fn with_params(action: Action, params: Params) -> Self {
        Self {
            action,
            params,
            correlation_id: None,
        }
    }

    /// Attach a correlation id
    pub fn correlated(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Insert a parameter, builder style
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Build the device's reply to a press
    pub fn press_result(result: bool, req_id: Option<String>) -> Self {
        Self {
            action: Action::PressResult,
            params: Params::from_iter([("result".to_string(), Value::Bool(result))]),
            correlation_id: req_id,
        }
    }

    /// `params.result` as a bool, when present
    pub fn result_flag(&self) -> Option<bool> {
        self.params.get("result").and_then(Value::as_bool)
    }
}

/// Everything that can arrive on a device connection
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Identification handshake, `{"device_id": ...}`
    Identify { device_id: String },
    /// A regular action envelope
    Command(Envelope),
}
