//! Device configuration

use anyhow::{Context, Result};
use fingerbot_shared::protocol::HEARTBEAT_INTERVAL_MS;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Port the TCP provisioning link listens on
pub const DEFAULT_PROVISIONING_PORT: u16 = 8266;

/// Which controller endpoint the device connects to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerTransport {
    /// Length-framed JSON over TCP to `server_host:tcp_port`
    #[default]
    Stream,
    /// WebSocket to `/ws/device/{id}` on `server_host:server_port`
    Message,
}

impl ControllerTransport {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stream" | "tcp" => Some(Self::Stream),
            "message" | "websocket" | "ws" => Some(Self::Message),
            _ => None,
        }
    }
}

/// Locally administered address used when no hardware MAC is configured
pub const DEFAULT_SIMULATED_MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Directory holding `wifi_config.json` and `device_id.txt`
    pub state_dir: PathBuf,
    /// Where the TCP provisioning link listens
    pub provisioning_addr: SocketAddr,
    /// Enter provisioning even when already configured
    pub setup_mode: bool,
    /// MAC reported by the simulated network interface
    pub mac: [u8; 6],
    /// Networks the simulated interface can see and join
    pub networks: Vec<String>,
    pub transport: ControllerTransport,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("."),
            provisioning_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PROVISIONING_PORT)),
            setup_mode: false,
            mac: DEFAULT_SIMULATED_MAC,
            networks: Vec::new(),
            transport: ControllerTransport::default(),
            heartbeat_interval: Duration::from_millis(HEARTBEAT_INTERVAL_MS),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl DeviceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("FINGERBOT_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(addr) = lookup("PROVISIONING_ADDR") {
            config.provisioning_addr = addr
                .parse()
                .with_context(|| format!("PROVISIONING_ADDR is not a socket address: {addr}"))?;
        }
        if let Some(flag) = lookup("FINGERBOT_SETUP") {
            config.setup_mode = parse_flag(&flag)
                .with_context(|| format!("FINGERBOT_SETUP must be a boolean: {flag}"))?;
        }
        if let Some(mac) = lookup("FINGERBOT_MAC") {
            config.mac = parse_mac(&mac).with_context(|| format!("FINGERBOT_MAC is not a MAC address: {mac}"))?;
        }
        if let Some(list) = lookup("FINGERBOT_NETWORKS") {
            config.networks = list
                .split(',')
                .map(str::trim)
                .filter(|ssid| !ssid.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(transport) = lookup("FINGERBOT_TRANSPORT") {
            config.transport = ControllerTransport::parse(&transport)
                .with_context(|| format!("FINGERBOT_TRANSPORT must be stream or websocket: {transport}"))?;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Parse `AA:BB:CC:DD:EE:FF` (or `-` separated)
pub fn parse_mac(value: &str) -> Option<[u8; 6]> {
    let mut mac = [0u8; 6];
    let mut parts = value.trim().split([':', '-']);
    for byte in mac.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    parts.next().is_none().then_some(mac)
}
