//! Framed stream connections: accept loop, identification handshake and the
//! per-connection read loop

use super::registry::{DeviceHandle, TransportRegistry};
use anyhow::{anyhow, Result};
use fingerbot_shared::{Action, Envelope, Frame, FrameDecoder};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const READ_BUF_LEN: usize = 4096;

/// Accept stream connections until `shutdown` fires, spawning one task per
/// connection
pub async fn serve_stream(
    listener: TcpListener,
    registry: Arc<TransportRegistry>,
    handshake_timeout: Duration,
    shutdown: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Stream transport listening");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Stream transport stopped");
                return;
            }
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                if let Err(e) = socket.set_nodelay(true) {
                    debug!(%addr, error = %e, "Could not set TCP_NODELAY");
                }

                debug!(%addr, "Stream connection accepted");
                let registry = registry.clone();
                tokio::spawn(async move {
                    handle_stream_connection(socket, addr.to_string(), registry, handshake_timeout)
                        .await;
                });
            }
        }
    }
}

/// Drive one stream connection from handshake to teardown
///
/// The first frame must identify the device; anything else closes the
/// connection before it is ever bound.
pub async fn handle_stream_connection<S>(
    stream: S,
    peer: String,
    registry: Arc<TransportRegistry>,
    handshake_timeout: Duration,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let mut session = StreamSession::new();

    let device_id = match tokio::time::timeout(handshake_timeout, session.recv(&mut reader)).await
    {
        Ok(Ok(Some(Frame::Identify { device_id }))) => device_id,
        Ok(Ok(Some(Frame::Command(envelope)))) => {
            warn!(%peer, action = %envelope.action, "First frame was not an identification, closing");
            return;
        }
        Ok(Ok(None)) => {
            debug!(%peer, "Connection closed before identification");
            return;
        }
        Ok(Err(e)) => {
            warn!(%peer, error = %e, "Handshake failed, closing");
            return;
        }
        Err(_) => {
            warn!(%peer, timeout_ms = handshake_timeout.as_millis() as u64, "Handshake timed out, closing");
            return;
        }
    };

    let handle = DeviceHandle::stream(device_id.clone(), writer);
    registry.bind(handle.clone()).await;
    info!(%peer, device_id = %device_id, "Device identified");

    session.run(&mut reader, &handle).await;

    registry.unbind(&device_id, &handle).await;
    if let Some(pending) = handle.pending() {
        let dropped = pending.fail_all().await;
        if dropped > 0 {
            info!(device_id = %device_id, dropped, "Dropped pending requests on disconnect");
        }
    }
    handle.shutdown().await;
    info!(%peer, device_id = %device_id, "Device disconnected");
}

/// Decoder state for one stream connection
struct StreamSession {
    decoder: FrameDecoder,
    read_buf: Vec<u8>,
}

impl StreamSession {
    fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            read_buf: vec![0u8; READ_BUF_LEN],
        }
    }

    /// Read the next frame. Returns `None` if the connection is closed.
    async fn recv<R>(&mut self, reader: &mut R) -> Result<Option<Frame>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.decoder.decode_next()? {
                return Ok(Some(frame));
            }

            let n = reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Ok(None);
            }
            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    /// Consume frames until the peer goes away or the handle is closed
    async fn run<R>(&mut self, reader: &mut R, handle: &DeviceHandle)
    where
        R: AsyncRead + Unpin,
    {
        let closed = handle.close_token();

        loop {
            // Drain everything already buffered
            loop {
                match self.decoder.decode_next() {
                    Ok(Some(frame)) => on_frame(handle, frame).await,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(device_id = %handle.device_id(), error = %e, "Dropping undecodable frame");
                    }
                }
            }

            tokio::select! {
                _ = closed.cancelled() => {
                    debug!(device_id = %handle.device_id(), "Connection closed locally");
                    return;
                }
                read = reader.read(&mut self.read_buf) => match read {
                    Ok(0) => return,
                    Ok(n) => self.decoder.extend(&self.read_buf[..n]),
                    Err(e) => {
                        warn!(device_id = %handle.device_id(), error = %e, "Read error");
                        return;
                    }
                }
            }
        }
    }
}

/// Route one inbound frame: correlated responses go to their waiter, the
/// rest is unsolicited and only logged
async fn on_frame(handle: &DeviceHandle, frame: Frame) {
    let envelope = match frame {
        Frame::Command(envelope) => envelope,
        Frame::Identify { device_id } => {
            debug!(device_id = %handle.device_id(), announced = %device_id, "Ignoring repeated identification");
            return;
        }
    };

    let envelope = match handle.pending() {
        Some(pending) => match pending.resolve(envelope).await {
            Ok(()) => return,
            Err(unmatched) => unmatched,
        },
        None => envelope,
    };

    log_unsolicited(handle.device_id(), &envelope);
}

fn log_unsolicited(device_id: &str, envelope: &Envelope) {
    match envelope.action {
        Action::Heartbeat => debug!(%device_id, "Heartbeat"),
        Action::PressResult => info!(
            %device_id,
            result = ?envelope.result_flag(),
            req_id = ?envelope.correlation_id,
            "Uncorrelated press result"
        ),
        _ => debug!(%device_id, action = %envelope.action, "Discarding unsolicited message"),
    }
}

/// Encode the identification frame a device sends right after connecting
pub fn identify_frame(device_id: &str) -> Result<bytes::Bytes> {
    if device_id.is_empty() {
        return Err(anyhow!("device id must not be empty"));
    }
    Ok(fingerbot_shared::codec::encode_frame(&Frame::Identify {
        device_id: device_id.to_string(),
    })?)
}
