//! Persistent controller connection with automatic reconnection

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use fingerbot_shared::{codec, Action, Envelope, Frame, FrameDecoder};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::message::handle_message_connection;
use crate::transport::{MessageConnector, TransportConnector, TransportStream};
use tokio_tungstenite::WebSocketStream;

/// Events emitted by the connection manager
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Connected and identified to the controller
    Connected { transport: &'static str },
    /// An established connection ended
    Disconnected { reason: String },
    /// A connection attempt failed; another follows after the backoff
    ConnectionFailed { reason: String },
    /// Received an envelope from the controller
    Received(Envelope),
}

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Identity sent in the handshake
    pub device_id: String,
    pub heartbeat_interval: Duration,
    /// Reconnection delay (initial)
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            heartbeat_interval: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Keeps one connection to the controller alive in a background task
pub struct ConnectionManager {
    device_id: String,
    outbound_tx: mpsc::Sender<Envelope>,
    event_rx: mpsc::Receiver<ConnectionEvent>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    /// Start the connection loop over a framed byte stream
    pub fn new<C>(connector: C, config: ConnectionConfig) -> Self
    where
        C: TransportConnector + 'static,
    {
        Self::spawn(StreamDialer(connector), config)
    }

    /// Start the connection loop over the controller's WebSocket endpoint
    pub fn websocket<M>(connector: M, config: ConnectionConfig) -> Self
    where
        M: MessageConnector + 'static,
    {
        Self::spawn(MessageDialer(connector), config)
    }

    fn spawn<D: Dialer>(dialer: D, config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Envelope>(100);
        let (event_tx, event_rx) = mpsc::channel::<ConnectionEvent>(100);
        let shutdown = CancellationToken::new();

        let device_id = config.device_id.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = connection_loop(dialer, config, outbound_rx, event_tx) => {}
            }
        });

        Self {
            device_id,
            outbound_tx,
            event_rx,
            shutdown,
        }
    }

    /// Queue an envelope for the controller
    pub async fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbound_tx
            .send(envelope)
            .await
            .map_err(|_| anyhow!("Connection closed"))
    }

    /// Receive the next connection event
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.outbound_tx.clone()
    }

    /// Stop the background task and drop the connection
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Exponential backoff step, capped
pub fn next_delay(current: Duration, max: Duration) -> Duration {
    std::cmp::min(current * 2, max)
}

/// How one kind of controller connection is opened and then served
#[async_trait]
trait Dialer: Send + Sync + 'static {
    type Conn: Send + 'static;

    fn name(&self) -> &'static str;

    async fn dial(&self) -> Result<Self::Conn>;

    async fn serve(
        &self,
        conn: Self::Conn,
        config: &ConnectionConfig,
        outbound_rx: &mut mpsc::Receiver<Envelope>,
        event_tx: &mpsc::Sender<ConnectionEvent>,
    ) -> Result<()>;
}

struct StreamDialer<C>(C);

#[async_trait]
impl<C: TransportConnector + 'static> Dialer for StreamDialer<C> {
    type Conn = C::Stream;

    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn dial(&self) -> Result<C::Stream> {
        self.0.connect().await
    }

    async fn serve(
        &self,
        conn: C::Stream,
        config: &ConnectionConfig,
        outbound_rx: &mut mpsc::Receiver<Envelope>,
        event_tx: &mpsc::Sender<ConnectionEvent>,
    ) -> Result<()> {
        handle_connection(conn, config, outbound_rx, event_tx).await
    }
}

struct MessageDialer<M>(M);

#[async_trait]
impl<M: MessageConnector + 'static> Dialer for MessageDialer<M> {
    type Conn = WebSocketStream<M::Stream>;

    fn name(&self) -> &'static str {
        self.0.name()
    }

    async fn dial(&self) -> Result<Self::Conn> {
        self.0.connect().await
    }

    async fn serve(
        &self,
        conn: Self::Conn,
        config: &ConnectionConfig,
        outbound_rx: &mut mpsc::Receiver<Envelope>,
        event_tx: &mpsc::Sender<ConnectionEvent>,
    ) -> Result<()> {
        handle_message_connection(conn, config, outbound_rx, event_tx).await
    }
}

async fn connection_loop<D: Dialer>(
    dialer: D,
    config: ConnectionConfig,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    event_tx: mpsc::Sender<ConnectionEvent>,
) {
    let mut reconnect_delay = config.reconnect_delay;

    loop {
        match timeout(config.connect_timeout, dialer.dial()).await {
            Ok(Ok(conn)) => {
                reconnect_delay = config.reconnect_delay;
                info!(transport = dialer.name(), device_id = %config.device_id, "Connected");

                let _ = event_tx
                    .send(ConnectionEvent::Connected {
                        transport: dialer.name(),
                    })
                    .await;

                let reason = match dialer.serve(conn, &config, &mut outbound_rx, &event_tx).await {
                    Ok(()) => "Closed".to_string(),
                    Err(e) => e.to_string(),
                };
                warn!(%reason, "Disconnected");
                let _ = event_tx
                    .send(ConnectionEvent::Disconnected { reason })
                    .await;
            }
            Ok(Err(e)) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: e.to_string(),
                    })
                    .await;
            }
            Err(_) => {
                let _ = event_tx
                    .send(ConnectionEvent::ConnectionFailed {
                        reason: "Connect timed out".into(),
                    })
                    .await;
            }
        }

        if event_tx.is_closed() {
            debug!("Event receiver gone, stopping connection loop");
            return;
        }

        debug!(delay_ms = reconnect_delay.as_millis() as u64, "Reconnecting after backoff");
        tokio::time::sleep(reconnect_delay).await;
        reconnect_delay = next_delay(reconnect_delay, config.max_reconnect_delay);
    }
}

/// Identify, then pump heartbeats, outbound envelopes and inbound frames
async fn handle_connection<S: TransportStream>(
    stream: S,
    config: &ConnectionConfig,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()> {
    let (mut reader, mut writer) = tokio::io::split(stream);

    let identify = codec::encode_frame(&Frame::Identify {
        device_id: config.device_id.clone(),
    })?;
    writer.write_all(&identify).await?;

    let mut decoder = FrameDecoder::new();
    let mut read_buf = vec![0u8; 4096];

    let start_time = Instant::now();
    let mut heartbeat = interval_at(
        start_time + config.heartbeat_interval,
        config.heartbeat_interval,
    );

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let envelope = Envelope::new(Action::Heartbeat)
                    .param("uptime_ms", start_time.elapsed().as_millis() as u64);
                writer.write_all(&codec::encode(&envelope)?).await?;
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(envelope) => writer.write_all(&codec::encode(&envelope)?).await?,
                    None => return Ok(()),
                }
            }

            result = reader.read(&mut read_buf) => {
                let n = result?;
                if n == 0 {
                    return Err(anyhow!("Server closed connection"));
                }
                decoder.extend(&read_buf[..n]);

                loop {
                    match decoder.decode_next() {
                        Ok(Some(Frame::Command(envelope))) => {
                            let _ = event_tx.send(ConnectionEvent::Received(envelope)).await;
                        }
                        Ok(Some(Frame::Identify { device_id })) => {
                            debug!(%device_id, "Ignoring identify frame from controller");
                        }
                        Ok(None) => break,
                        Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                    }
                }
            }
        }
    }
}
