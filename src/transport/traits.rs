//! Transport traits shared by the provisioning link and the controller client

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;

/// A byte stream the device reads and writes
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Outbound connections to the controller
#[async_trait]
pub trait TransportConnector: Send + Sync {
    type Stream: TransportStream;

    /// Attempt to connect, returning a stream on success
    async fn connect(&self) -> Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}

/// Outbound connections to the controller's WebSocket endpoint
#[async_trait]
pub trait MessageConnector: Send + Sync {
    /// Byte stream underneath the WebSocket
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Connect and complete the WebSocket handshake
    async fn connect(&self) -> Result<WebSocketStream<Self::Stream>>;

    fn name(&self) -> &'static str;
}

/// Inbound provisioning links, one peer at a time
#[async_trait]
pub trait LinkListener: Send + Sync {
    type Stream: TransportStream;

    /// Wait for the next peer; returns the stream and a printable peer address
    async fn accept(&self) -> Result<(Self::Stream, String)>;

    fn name(&self) -> &'static str;
}

#[cfg(test)]
#[async_trait]
impl TransportStream for tokio::io::DuplexStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}
