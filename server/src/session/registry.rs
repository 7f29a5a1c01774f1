//! Transport registry: which live connection currently represents a device

use crate::command::PendingRequests;
use crate::error::DispatchError;
use fingerbot_shared::{codec, Envelope};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Longest a single write may take before the connection is given up on
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long shutdown waits for the writer before abandoning it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which kind of transport a binding uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Length-framed JSON over a raw byte stream
    Stream,
    /// One JSON object per message (WebSocket)
    Message,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stream => write!(f, "stream"),
            TransportKind::Message => write!(f, "message"),
        }
    }
}

#[derive(Clone)]
enum Link {
    Stream {
        writer: Arc<Mutex<BoxedWriter>>,
        pending: PendingRequests,
    },
    Message {
        outbound: mpsc::Sender<String>,
    },
}

/// Cloneable handle to one live device connection
///
/// Two handles are equal only if they refer to the same connection, so a
/// stale handle can never remove a newer binding.
#[derive(Clone)]
pub struct DeviceHandle {
    connection_id: u64,
    device_id: Arc<str>,
    closed: CancellationToken,
    link: Link,
}

impl DeviceHandle {
    /// Handle for a framed stream connection, writing through `writer`
    pub fn stream<W>(device_id: impl Into<String>, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_link(
            device_id.into(),
            Link::Stream {
                writer: Arc::new(Mutex::new(Box::new(writer))),
                pending: PendingRequests::new(),
            },
        )
    }

    /// Handle for a message connection; encoded text is pushed to `outbound`
    /// and written by the connection's own task
    pub fn message(device_id: impl Into<String>, outbound: mpsc::Sender<String>) -> Self {
        Self::with_link(device_id.into(), Link::Message { outbound })
    }

    fn with_link(device_id: String, link: Link) -> Self {
        Self {
            connection_id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            device_id: device_id.into(),
            closed: CancellationToken::new(),
            link,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn kind(&self) -> TransportKind {
        match self.link {
            Link::Stream { .. } => TransportKind::Stream,
            Link::Message { .. } => TransportKind::Message,
        }
    }

    /// Pending correlated requests, for stream connections only
    pub fn pending(&self) -> Option<&PendingRequests> {
        match &self.link {
            Link::Stream { pending, .. } => Some(pending),
            Link::Message { .. } => None,
        }
    }

    /// Token that fires when the connection is closed or replaced
    pub fn close_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Ask the connection's task to shut the connection down
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Encode and write one envelope on this connection
    ///
    /// Gives up with a transport error when the connection is closed or
    /// replaced mid-write, or when the peer stops draining for longer than
    /// [`WRITE_TIMEOUT`].
    pub async fn send(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Transport("connection closed".into()));
        }

        tokio::select! {
            _ = self.closed.cancelled() => Err(DispatchError::Transport("connection closed".into())),
            written = tokio::time::timeout(WRITE_TIMEOUT, self.write(envelope)) => {
                written.unwrap_or_else(|_| Err(DispatchError::Transport("write timed out".into())))
            }
        }
    }

    async fn write(&self, envelope: &Envelope) -> Result<(), DispatchError> {
        match &self.link {
            Link::Stream { writer, .. } => {
                let encoded = codec::encode(envelope)?;
                let mut writer = writer.lock().await;
                writer.write_all(&encoded).await?;
                writer.flush().await?;
            }
            Link::Message { outbound } => {
                let text = codec::encode_message(envelope)?;
                outbound
                    .send(text)
                    .await
                    .map_err(|_| DispatchError::Transport("message channel closed".into()))?;
            }
        }
        Ok(())
    }

    /// Flush and close the write side of a stream connection
    ///
    /// Bounded: a peer that never reads cannot hold the caller here.
    pub async fn shutdown(&self) {
        self.close();
        if let Link::Stream { writer, .. } = &self.link {
            let flushed = tokio::time::timeout(SHUTDOWN_GRACE, async {
                writer.lock().await.shutdown().await
            })
            .await;
            match flushed {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(device_id = %self.device_id, error = %e, "Shutdown of stream writer failed");
                }
                Err(_) => {
                    debug!(device_id = %self.device_id, "Stream writer did not shut down in time");
                }
            }
        }
    }
}

impl PartialEq for DeviceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id
    }
}

impl Eq for DeviceHandle {}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("connection_id", &self.connection_id)
            .field("device_id", &self.device_id)
            .field("kind", &self.kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Maps each device id to its one current connection
///
/// Holds no business logic; bindings are rebuilt from scratch as devices
/// reconnect after a restart.
#[derive(Default)]
pub struct TransportRegistry {
    bindings: RwLock<HashMap<String, DeviceHandle>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handle` as the binding for its device, closing any previous
    /// connection for the same id. Returns the replaced handle, if any.
    ///
    /// Correlated requests in flight on the replaced connection are left to
    /// time out.
    pub async fn bind(&self, handle: DeviceHandle) -> Option<DeviceHandle> {
        let device_id = handle.device_id().to_string();
        let kind = handle.kind();
        let previous = self.bindings.write().await.insert(device_id.clone(), handle);

        if let Some(ref old) = previous {
            old.close();
            info!(
                device_id = %device_id,
                old_connection = old.connection_id(),
                "Replaced existing binding"
            );
        }
        info!(device_id = %device_id, transport = %kind, "Device bound");
        previous
    }

    /// Remove the binding for `device_id`, but only if it is still `handle`
    pub async fn unbind(&self, device_id: &str, handle: &DeviceHandle) -> bool {
        let mut bindings = self.bindings.write().await;
        let is_current = bindings.get(device_id).map(|current| current == handle);
        match is_current {
            Some(true) => {
                bindings.remove(device_id);
                info!(device_id = %device_id, "Device unbound");
                true
            }
            Some(false) => {
                debug!(device_id = %device_id, "Stale unbind ignored, newer binding present");
                false
            }
            None => false,
        }
    }

    /// Current handle for a device
    pub async fn lookup(&self, device_id: &str) -> Option<DeviceHandle> {
        self.bindings.read().await.get(device_id).cloned()
    }

    /// All bound device ids with their transport kind
    pub async fn connected_devices(&self) -> Vec<(String, TransportKind)> {
        let bindings = self.bindings.read().await;
        let mut devices: Vec<_> = bindings
            .iter()
            .map(|(id, handle)| (id.clone(), handle.kind()))
            .collect();
        devices.sort();
        devices
    }

    pub async fn count(&self) -> usize {
        self.bindings.read().await.len()
    }
}
