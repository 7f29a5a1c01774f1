//! WebSocket transport for the controller's message endpoint

use crate::transport::traits::MessageConnector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Connects to a `ws://` or `wss://` URL
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MessageConnector for WsConnector {
    type Stream = MaybeTlsStream<TcpStream>;

    async fn connect(&self) -> Result<WebSocketStream<Self::Stream>> {
        let (socket, response) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("WebSocket connect to {} failed", self.url))?;
        debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");
        Ok(socket)
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}
