mod command;
mod config;
mod connection;
mod hardware;
mod provisioning;
mod store;
mod transport;

use anyhow::{Context, Result};
use command::CommandExecutor;
use config::{ControllerTransport, DeviceConfig};
use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
use hardware::{format_mac, NetworkInterface, SimulatedActuator, SimulatedNetwork};
use provisioning::{run_provisioning, ProvisioningHandler};
use std::sync::Arc;
use store::StateStore;
use transport::{TcpConnector, WsConnector};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = DeviceConfig::from_env().context("invalid device configuration")?;
    let store = StateStore::new(&config.state_dir);
    let mut settings = store
        .load_settings()
        .await
        .context("failed to load stored settings")?;

    let link = ProvisioningLink::open(&config).await?;
    let network: Arc<dyn NetworkInterface> = Arc::new(SimulatedNetwork::new(
        link.mac_address(&config),
        config.networks.clone(),
    ));

    let device_id = store
        .device_id(&format_mac(&network.mac_address()))
        .await
        .context("failed to establish device id")?;
    info!(device_id = %device_id, state_dir = %store.dir().display(), "Finger bot starting");

    if config.setup_mode || !settings.is_configured() {
        info!(setup_mode = config.setup_mode, "Entering provisioning");
        let mut handler = ProvisioningHandler::new(network.clone(), store.clone(), settings);
        link.provision(&mut handler).await?;
        settings = handler.settings().clone();
    }
    drop(link);

    if !settings.is_configured() {
        anyhow::bail!("provisioning finished without a network configuration");
    }
    if !network.connect(&settings.ssid, &settings.password).await {
        warn!(ssid = %settings.ssid, "Network join failed, controller may be unreachable");
    }

    let connection_config = ConnectionConfig {
        device_id: device_id.clone(),
        heartbeat_interval: config.heartbeat_interval,
        reconnect_delay: config.reconnect_delay,
        max_reconnect_delay: config.max_reconnect_delay,
        connect_timeout: config.connect_timeout,
    };
    let mut conn = match config.transport {
        ControllerTransport::Stream => {
            let endpoint = settings
                .stream_endpoint()
                .context("no controller host configured")?;
            info!(endpoint = %endpoint, "Controller stream endpoint");
            ConnectionManager::new(TcpConnector::new(endpoint), connection_config)
        }
        ControllerTransport::Message => {
            let url = settings
                .message_endpoint(&device_id)
                .context("no controller host configured")?;
            info!(url = %url, "Controller WebSocket endpoint");
            ConnectionManager::websocket(WsConnector::new(url), connection_config)
        }
    };
    let executor = Arc::new(CommandExecutor::new(Arc::new(SimulatedActuator::default())));

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            event = conn.recv() => event,
        };

        match event {
            Some(ConnectionEvent::Connected { transport }) => {
                info!(transport, device_id = conn.device_id(), "Connected to controller");
            }
            Some(ConnectionEvent::Disconnected { reason }) => {
                warn!(%reason, "Disconnected from controller");
            }
            Some(ConnectionEvent::ConnectionFailed { reason }) => {
                error!(%reason, "Connection attempt failed");
            }
            Some(ConnectionEvent::Received(envelope)) => {
                // Presses take a while; keep reading events meanwhile
                let executor = executor.clone();
                let sender = conn.sender();
                tokio::spawn(async move {
                    if let Some(reply) = executor.execute(&envelope).await {
                        if sender.send(reply).await.is_err() {
                            warn!("Reply dropped, connection manager gone");
                        }
                    }
                });
            }
            None => {
                error!("Connection manager stopped");
                break;
            }
        }
    }

    conn.shutdown();
    Ok(())
}

/// Link used for provisioning: RFCOMM with the `bluetooth` feature, TCP
/// otherwise
#[cfg(feature = "bluetooth")]
struct ProvisioningLink {
    adapter: bluer::Adapter,
    address: bluer::Address,
}

#[cfg(feature = "bluetooth")]
impl ProvisioningLink {
    async fn open(_config: &DeviceConfig) -> Result<Self> {
        let adapter = transport::rfcomm::default_adapter()
            .await
            .context("no usable Bluetooth adapter")?;
        let address = adapter.address().await?;
        Ok(Self { adapter, address })
    }

    /// The adapter's address stands in for the hardware MAC
    fn mac_address(&self, _config: &DeviceConfig) -> [u8; 6] {
        self.address.0
    }

    async fn provision(&self, handler: &mut ProvisioningHandler) -> Result<()> {
        let listener =
            transport::RfcommLinkListener::bind(&self.adapter, transport::DEFAULT_RFCOMM_CHANNEL)
                .await?;
        run_provisioning(&listener, handler).await
    }
}

#[cfg(not(feature = "bluetooth"))]
struct ProvisioningLink {
    addr: std::net::SocketAddr,
}

#[cfg(not(feature = "bluetooth"))]
impl ProvisioningLink {
    async fn open(config: &DeviceConfig) -> Result<Self> {
        Ok(Self {
            addr: config.provisioning_addr,
        })
    }

    fn mac_address(&self, config: &DeviceConfig) -> [u8; 6] {
        config.mac
    }

    async fn provision(&self, handler: &mut ProvisioningHandler) -> Result<()> {
        let listener = transport::TcpLinkListener::bind(self.addr).await?;
        run_provisioning(&listener, handler).await
    }
}
