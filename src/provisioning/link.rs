//! Serving provisioning peers over a link

use anyhow::Result;
use fingerbot_shared::ProvisioningResponse;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::handler::ProvisioningHandler;
use super::reassembler::{Reassembled, Reassembler};
use crate::transport::{LinkListener, TransportStream};

const READ_CHUNK: usize = 512;

/// Serve one peer until it disconnects or the device gets registered
pub async fn serve_link<S: TransportStream>(
    mut stream: S,
    peer: &str,
    handler: &mut ProvisioningHandler,
) -> Result<()> {
    let mut reassembler = Reassembler::new();
    let mut buf = [0u8; READ_CHUNK];

    let result = loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e.into()),
        };
        debug!(peer = %peer, bytes = n, "Link fragment");

        let response = match reassembler.push(&buf[..n]) {
            Reassembled::Incomplete => continue,
            Reassembled::Message(request) => handler.handle(&request).await,
            Reassembled::Invalid(message) => {
                warn!(peer = %peer, %message, "Rejected link data");
                ProvisioningResponse::error(message)
            }
        };

        if let Err(e) = send_response(&mut stream, &response).await {
            break Err(e);
        }
        if handler.is_registered() {
            break Ok(());
        }
    };

    reassembler.clear();
    if let Err(e) = TransportStream::shutdown(&mut stream).await {
        debug!(peer = %peer, error = %e, "Link shutdown");
    }
    result
}

async fn send_response<S: TransportStream>(stream: &mut S, response: &ProvisioningResponse) -> Result<()> {
    let bytes = response.to_bytes()?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

/// Accept peers one after another until one of them registers the device
pub async fn run_provisioning<L: LinkListener>(
    listener: &L,
    handler: &mut ProvisioningHandler,
) -> Result<()> {
    info!(link = listener.name(), "Waiting for provisioning peer");

    while !handler.is_registered() {
        let (stream, peer) = listener.accept().await?;
        info!(peer = %peer, link = listener.name(), "Provisioning peer connected");

        match serve_link(stream, &peer, handler).await {
            Ok(()) => info!(peer = %peer, "Provisioning peer disconnected"),
            Err(e) => warn!(peer = %peer, error = %e, "Provisioning link failed"),
        }
    }

    info!(
        name = handler.device_name().unwrap_or_default(),
        "Provisioning complete"
    );
    Ok(())
}
