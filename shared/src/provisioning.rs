//! Provisioning vocabulary spoken over the device setup link
//!
//! Requests are JSON objects tagged by `command`; every request gets exactly
//! one JSON object back.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::protocol::{DEFAULT_HTTP_PORT, DEFAULT_STREAM_PORT};

/// Network and server settings pushed during provisioning and persisted on
/// the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSettings {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
}

fn default_server_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_tcp_port() -> u16 {
    DEFAULT_STREAM_PORT
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            server_host: String::new(),
            server_port: default_server_port(),
            tcp_port: default_tcp_port(),
        }
    }
}

impl NetworkSettings {
    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }

    /// Address of the controller's stream transport
    pub fn stream_endpoint(&self) -> Option<String> {
        let host = strip_scheme(&self.server_host);
        if host.is_empty() {
            return None;
        }
        Some(format!("{}:{}", host, self.tcp_port))
    }

    /// URL of the controller's WebSocket endpoint for `device_id`; port 443
    /// selects TLS
    pub fn message_endpoint(&self, device_id: &str) -> Option<String> {
        let host = strip_scheme(&self.server_host);
        if host.is_empty() {
            return None;
        }
        let scheme = if self.server_port == 443 { "wss" } else { "ws" };
        Some(format!("{scheme}://{host}:{}/ws/device/{device_id}", self.server_port))
    }
}

fn strip_scheme(host: &str) -> &str {
    host.strip_prefix("https://")
        .or_else(|| host.strip_prefix("http://"))
        .unwrap_or(host)
        .trim_end_matches('/')
}

/// A decoded provisioning request
#[derive(Debug, Clone, PartialEq)]
pub enum ProvisioningCommand {
    ScanWifi,
    ConfigureWifi(NetworkSettings),
    GetMac,
    GetConfig,
    RegisterDevice { name: String },
    Unknown(String),
}

impl ProvisioningCommand {
    /// Interpret a parsed request object
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let name = value.get("command").and_then(Value::as_str).unwrap_or("");

        Ok(match name {
            "scan_wifi" => ProvisioningCommand::ScanWifi,
            "configure_wifi" => {
                ProvisioningCommand::ConfigureWifi(NetworkSettings::deserialize(value)?)
            }
            "get_mac" => ProvisioningCommand::GetMac,
            "get_config" => ProvisioningCommand::GetConfig,
            "register_device" => ProvisioningCommand::RegisterDevice {
                name: value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            },
            other => ProvisioningCommand::Unknown(other.to_string()),
        })
    }

    /// Wire name of the command
    pub fn name(&self) -> &str {
        match self {
            ProvisioningCommand::ScanWifi => "scan_wifi",
            ProvisioningCommand::ConfigureWifi(_) => "configure_wifi",
            ProvisioningCommand::GetMac => "get_mac",
            ProvisioningCommand::GetConfig => "get_config",
            ProvisioningCommand::RegisterDevice { .. } => "register_device",
            ProvisioningCommand::Unknown(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Reply to a provisioning request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProvisioningResponse {
    Networks { networks: Vec<String> },
    Mac { mac: String },
    Config { config: Map<String, Value> },
    Status { status: Status, message: String },
}

impl ProvisioningResponse {
    pub fn success(message: impl Into<String>) -> Self {
        ProvisioningResponse::Status {
            status: Status::Success,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ProvisioningResponse::Status {
            status: Status::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ProvisioningResponse::Status {
                status: Status::Error,
                ..
            }
        )
    }

    /// Serialize for the link
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
