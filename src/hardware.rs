//! Peripherals behind traits: the press actuator and the network interface

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Performs the physical press
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Press and release. Returns whether the stroke completed.
    async fn press(&self) -> bool;
}

/// Wireless interface used during provisioning
#[async_trait]
pub trait NetworkInterface: Send + Sync {
    fn mac_address(&self) -> [u8; 6];

    /// Visible network names, without empties or duplicates
    async fn scan(&self) -> Vec<String>;

    /// Join a network. Returns whether the association succeeded.
    async fn connect(&self, ssid: &str, password: &str) -> bool;
}

/// Colon-separated upper-case hex
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Actuator for hosts without the servo: waits out the stroke and counts
#[derive(Debug)]
pub struct SimulatedActuator {
    stroke: Duration,
    presses: AtomicU64,
}

impl SimulatedActuator {
    pub fn new(stroke: Duration) -> Self {
        Self {
            stroke,
            presses: AtomicU64::new(0),
        }
    }

    pub fn presses(&self) -> u64 {
        self.presses.load(Ordering::Relaxed)
    }
}

impl Default for SimulatedActuator {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl Actuator for SimulatedActuator {
    async fn press(&self) -> bool {
        debug!("Stroke down");
        tokio::time::sleep(self.stroke).await;
        debug!("Stroke up");
        tokio::time::sleep(self.stroke).await;

        let count = self.presses.fetch_add(1, Ordering::Relaxed) + 1;
        info!(count, "Press performed");
        true
    }
}

/// Network interface that sees a fixed list of networks and can join any
/// of them
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    mac: [u8; 6],
    networks: Vec<String>,
}

impl SimulatedNetwork {
    pub fn new(mac: [u8; 6], networks: Vec<String>) -> Self {
        Self { mac, networks }
    }
}

#[async_trait]
impl NetworkInterface for SimulatedNetwork {
    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    async fn scan(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for ssid in &self.networks {
            if !ssid.is_empty() && !seen.contains(ssid) {
                seen.push(ssid.clone());
            }
        }
        info!(count = seen.len(), "Network scan complete");
        seen
    }

    async fn connect(&self, ssid: &str, _password: &str) -> bool {
        let joined = self.networks.iter().any(|n| n == ssid);
        info!(%ssid, joined, "Network join");
        joined
    }
}
