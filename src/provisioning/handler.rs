//! Provisioning command handling

use fingerbot_shared::{NetworkSettings, ProvisioningCommand, ProvisioningResponse};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::hardware::{format_mac, NetworkInterface};
use crate::store::StateStore;

const REDACTED: &str = "********";

/// Answers provisioning requests; one response per request
pub struct ProvisioningHandler {
    network: Arc<dyn NetworkInterface>,
    store: StateStore,
    settings: NetworkSettings,
    registered: Option<String>,
}

impl ProvisioningHandler {
    /// `settings` is whatever is currently stored, reported by `get_config`
    pub fn new(network: Arc<dyn NetworkInterface>, store: StateStore, settings: NetworkSettings) -> Self {
        Self {
            network,
            store,
            settings,
            registered: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.is_some()
    }

    /// Name given by `register_device`
    pub fn device_name(&self) -> Option<&str> {
        self.registered.as_deref()
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub async fn handle(&mut self, request: &Value) -> ProvisioningResponse {
        let command = match ProvisioningCommand::from_value(request) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Malformed provisioning request");
                return ProvisioningResponse::error(format!("Error processing command: {e}"));
            }
        };
        info!(command = command.name(), "Provisioning command");

        match command {
            ProvisioningCommand::ScanWifi => ProvisioningResponse::Networks {
                networks: self.network.scan().await,
            },
            ProvisioningCommand::ConfigureWifi(settings) => self.configure(settings).await,
            ProvisioningCommand::GetMac => ProvisioningResponse::Mac {
                mac: format_mac(&self.network.mac_address()),
            },
            ProvisioningCommand::GetConfig => ProvisioningResponse::Config {
                config: self.redacted_config(),
            },
            ProvisioningCommand::RegisterDevice { name } => {
                if name.is_empty() {
                    return ProvisioningResponse::error("Device name is required");
                }
                info!(name = %name, "Device registered");
                self.registered = Some(name);
                ProvisioningResponse::success("Device registered successfully")
            }
            ProvisioningCommand::Unknown(name) => {
                warn!(command = %name, "Unknown provisioning command");
                ProvisioningResponse::error(format!("Unknown command: {name}"))
            }
        }
    }

    async fn configure(&mut self, settings: NetworkSettings) -> ProvisioningResponse {
        if settings.ssid.is_empty() {
            return ProvisioningResponse::error("SSID is required");
        }

        // Persisted before joining so a failed join can be retried after reboot
        if let Err(e) = self.store.save_settings(&settings).await {
            warn!(error = %e, "Failed to persist settings");
            return ProvisioningResponse::error(format!("Error processing command: {e}"));
        }
        self.settings = settings;

        if self
            .network
            .connect(&self.settings.ssid, &self.settings.password)
            .await
        {
            ProvisioningResponse::success("WiFi configured successfully")
        } else {
            ProvisioningResponse::error("Failed to connect to WiFi")
        }
    }

    fn redacted_config(&self) -> Map<String, Value> {
        if !self.settings.is_configured() {
            return Map::new();
        }
        let mut config = match serde_json::to_value(&self.settings) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if !self.settings.password.is_empty() {
            config.insert("password".into(), Value::from(REDACTED));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::SimulatedNetwork;
    use serde_json::json;

    fn handler(dir: &std::path::Path) -> ProvisioningHandler {
        let network = SimulatedNetwork::new(
            [0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22],
            vec!["home".into(), "cafe".into()],
        );
        ProvisioningHandler::new(
            Arc::new(network),
            StateStore::new(dir),
            NetworkSettings::default(),
        )
    }

    fn to_json(response: &ProvisioningResponse) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_scan_and_mac() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());

        let response = handler.handle(&json!({"command": "scan_wifi"})).await;
        assert_eq!(to_json(&response), json!({"networks": ["home", "cafe"]}));

        let response = handler.handle(&json!({"command": "get_mac"})).await;
        assert_eq!(to_json(&response), json!({"mac": "AA:BB:CC:00:11:22"}));
    }

    #[tokio::test]
    async fn test_configure_persists_and_joins() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());

        let response = handler
            .handle(&json!({
                "command": "configure_wifi",
                "ssid": "home",
                "password": "secret",
                "server_host": "bot.example.org",
            }))
            .await;
        assert_eq!(
            to_json(&response),
            json!({"status": "success", "message": "WiFi configured successfully"})
        );

        let stored = StateStore::new(dir.path()).load_settings().await.unwrap();
        assert_eq!(stored.ssid, "home");
        assert_eq!(stored.tcp_port, 12345);

        let response = handler.handle(&json!({"command": "get_config"})).await;
        let config = to_json(&response);
        assert_eq!(config["config"]["ssid"], "home");
        assert_eq!(config["config"]["password"], REDACTED);
    }

    #[tokio::test]
    async fn test_configure_failures() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());

        let response = handler.handle(&json!({"command": "configure_wifi"})).await;
        assert_eq!(
            to_json(&response),
            json!({"status": "error", "message": "SSID is required"})
        );

        let response = handler
            .handle(&json!({"command": "configure_wifi", "ssid": "office"}))
            .await;
        assert_eq!(
            to_json(&response),
            json!({"status": "error", "message": "Failed to connect to WiFi"})
        );

        let response = handler
            .handle(&json!({"command": "configure_wifi", "ssid": 7}))
            .await;
        assert!(response.is_error());
    }

    #[tokio::test]
    async fn test_get_config_unconfigured_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());
        let response = handler.handle(&json!({"command": "get_config"})).await;
        assert_eq!(to_json(&response), json!({"config": {}}));
    }

    #[tokio::test]
    async fn test_register_device() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());

        let response = handler.handle(&json!({"command": "register_device"})).await;
        assert!(response.is_error());
        assert!(!handler.is_registered());

        let response = handler
            .handle(&json!({"command": "register_device", "name": "kitchen"}))
            .await;
        assert_eq!(
            to_json(&response),
            json!({"status": "success", "message": "Device registered successfully"})
        );
        assert_eq!(handler.device_name(), Some("kitchen"));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = handler(dir.path());
        let response = handler.handle(&json!({"command": "reboot"})).await;
        assert_eq!(
            to_json(&response),
            json!({"status": "error", "message": "Unknown command: reboot"})
        );
    }
}
