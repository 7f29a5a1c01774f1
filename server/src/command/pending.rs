//! Correlated requests awaiting a response on one stream connection

use fingerbot_shared::{Action, Envelope};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// A request that is waiting for its correlated response
#[derive(Debug)]
struct PendingRequest {
    action: Action,
    deadline: Instant,
    responder: oneshot::Sender<Envelope>,
}

/// Table of outstanding correlated requests, keyed by correlation id
///
/// Cloning shares the table. Dropping an entry (or the whole table via
/// [`PendingRequests::fail_all`]) wakes its waiter with a closed channel,
/// which the dispatcher reports as a disconnect.
///
/// The lock is never held across an await, so entries can also be removed
/// from `Drop` via [`PendingGuard`].
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    inner: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Guard that removes `correlation_id` from the table when dropped, so a
    /// waiter that is cancelled mid-await does not leave its entry behind
    pub fn guard(&self, correlation_id: impl Into<String>) -> PendingGuard {
        PendingGuard {
            table: self.clone(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Register a request and get the receiver its response will arrive on
    pub async fn register(
        &self,
        correlation_id: String,
        action: Action,
        timeout: Duration,
    ) -> oneshot::Receiver<Envelope> {
        let (responder, rx) = oneshot::channel();
        let request = PendingRequest {
            action,
            deadline: Instant::now() + timeout,
            responder,
        };
        self.entries().insert(correlation_id, request);
        rx
    }

    /// Hand a response to its waiter.
    ///
    /// Gives the envelope back when nothing is waiting for it, so the caller
    /// can treat it as unsolicited.
    pub async fn resolve(&self, envelope: Envelope) -> Result<(), Envelope> {
        let Some(id) = envelope.correlation_id.clone() else {
            return Err(envelope);
        };

        let Some(request) = self.entries().remove(&id) else {
            return Err(envelope);
        };

        if Instant::now() > request.deadline {
            warn!(req_id = %id, action = %request.action, "Late response for expired request");
        }

        debug!(req_id = %id, action = %request.action, response = %envelope.action, "Resolved pending request");
        if request.responder.send(envelope).is_err() {
            debug!(req_id = %id, "Waiter already gone");
        }
        Ok(())
    }

    pub async fn contains(&self, correlation_id: &str) -> bool {
        self.entries().contains_key(correlation_id)
    }

    pub async fn len(&self) -> usize {
        self.entries().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drop every outstanding request; their waiters observe a disconnect.
    /// Returns how many were dropped.
    pub async fn fail_all(&self) -> usize {
        let mut pending = self.entries();
        let count = pending.len();
        pending.clear();
        count
    }
}

/// Removes one request from its table on drop
#[derive(Debug)]
pub struct PendingGuard {
    table: PendingRequests,
    correlation_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.table.entries().remove(&self.correlation_id).is_some() {
            debug!(req_id = %self.correlation_id, "Abandoned pending request removed");
        }
    }
}
