//! Command dispatcher for sending actions to devices

use super::PendingRequests;
use crate::error::DispatchError;
use crate::session::{DeviceHandle, TransportRegistry};
use async_trait::async_trait;
use fingerbot_shared::{Action, Envelope, Params};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Anything that can deliver an action to a device without waiting for a
/// reply. The schedule engine only ever needs this much.
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn deliver(&self, device_id: &str, action: Action, params: Params)
        -> Result<(), DispatchError>;
}

/// Routes actions to whichever connection currently represents a device
#[derive(Clone)]
pub struct CommandDispatcher {
    registry: Arc<TransportRegistry>,
}

impl CommandDispatcher {
    pub fn new(registry: Arc<TransportRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TransportRegistry> {
        &self.registry
    }

    /// Send an action to a device and return as soon as it is written
    pub async fn send(
        &self,
        device_id: &str,
        action: Action,
        params: Params,
    ) -> Result<(), DispatchError> {
        let handle = self.bound(device_id).await?;
        let envelope = Envelope::with_params(action, params);
        self.write(&handle, &envelope).await?;

        info!(device_id = %device_id, action = %envelope.action, "Sent action");
        Ok(())
    }

    /// Send an action on a stream connection and wait for the response that
    /// echoes its correlation id
    pub async fn send_and_await(
        &self,
        device_id: &str,
        action: Action,
        params: Params,
        timeout: Duration,
    ) -> Result<Envelope, DispatchError> {
        let handle = self.bound(device_id).await?;
        let Some(pending) = handle.pending().cloned() else {
            return Err(DispatchError::Unsupported(handle.kind()));
        };

        let req_id = uuid::Uuid::new_v4().to_string();
        let envelope = Envelope::with_params(action.clone(), params).correlated(req_id.clone());
        let rx = pending.register(req_id.clone(), action, timeout).await;
        // Clears the entry on every exit, including the caller being dropped
        let _entry = pending.guard(req_id.clone());

        self.write(&handle, &envelope).await?;
        debug!(device_id = %device_id, req_id = %req_id, action = %envelope.action, "Awaiting response");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                info!(device_id = %device_id, req_id = %req_id, response = %response.action, "Received response");
                Ok(response)
            }
            Ok(Err(_)) => {
                warn!(device_id = %device_id, req_id = %req_id, "Connection closed while awaiting response");
                Err(DispatchError::Disconnected)
            }
            Err(_) => {
                warn!(
                    device_id = %device_id,
                    req_id = %req_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out awaiting response"
                );
                Err(DispatchError::TimedOut)
            }
        }
    }

    async fn bound(&self, device_id: &str) -> Result<DeviceHandle, DispatchError> {
        self.registry.lookup(device_id).await.ok_or_else(|| {
            debug!(device_id = %device_id, "Device offline");
            DispatchError::Offline(device_id.to_string())
        })
    }

    /// Write on a binding, tearing it down if the transport is broken
    async fn write(&self, handle: &DeviceHandle, envelope: &Envelope) -> Result<(), DispatchError> {
        let result = handle.send(envelope).await;
        if let Err(ref e) = result {
            if e.is_transport() {
                warn!(device_id = %handle.device_id(), error = %e, "Write failed, dropping binding");
                self.registry.unbind(handle.device_id(), handle).await;
                handle.close();
            }
        }
        result
    }
}

#[async_trait]
impl CommandSink for CommandDispatcher {
    async fn deliver(
        &self,
        device_id: &str,
        action: Action,
        params: Params,
    ) -> Result<(), DispatchError> {
        self.send(device_id, action, params).await
    }
}
