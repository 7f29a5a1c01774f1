//! RFCOMM provisioning link over BlueZ

use crate::transport::traits::{LinkListener, TransportStream};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluer::rfcomm::{Listener, SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::{Adapter, Address};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::info;

/// Channel the provisioning service listens on
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// RFCOMM stream wrapper implementing TransportStream
pub struct RfcommTransportStream {
    inner: RfcommStream,
    peer_addr: Address,
}

impl RfcommTransportStream {
    pub fn new(stream: RfcommStream, peer_addr: Address) -> Self {
        Self {
            inner: stream,
            peer_addr,
        }
    }

    pub fn peer_address(&self) -> Address {
        self.peer_addr
    }
}

impl AsyncRead for RfcommTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RfcommTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for RfcommTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Powered default adapter
pub async fn default_adapter() -> Result<Adapter> {
    let session = bluer::Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    Ok(adapter)
}

/// Accepts provisioning peers on an RFCOMM channel
pub struct RfcommLinkListener {
    listener: Listener,
    adapter_address: Address,
}

impl RfcommLinkListener {
    /// Make the adapter discoverable and listen on `channel`
    pub async fn bind(adapter: &Adapter, channel: u8) -> Result<Self> {
        adapter.set_discoverable(true).await?;
        adapter.set_pairable(true).await?;
        let adapter_address = adapter.address().await?;

        let listener = Listener::bind(RfcommAddr::new(Address::any(), channel))
            .await
            .map_err(|e| anyhow!("RFCOMM bind on channel {} failed: {}", channel, e))?;
        info!(adapter = %adapter_address, channel, "Provisioning link listening (RFCOMM)");

        Ok(Self {
            listener,
            adapter_address,
        })
    }

    /// Hardware address of the local adapter
    pub fn adapter_address(&self) -> Address {
        self.adapter_address
    }
}

#[async_trait]
impl LinkListener for RfcommLinkListener {
    type Stream = RfcommTransportStream;

    async fn accept(&self) -> Result<(Self::Stream, String)> {
        let (stream, peer) = self.listener.accept().await?;
        Ok((RfcommTransportStream::new(stream, peer.addr), peer.addr.to_string()))
    }

    fn name(&self) -> &'static str {
        "RFCOMM"
    }
}
