//! Command executor: runs controller commands against the hardware

use fingerbot_shared::{now_ms, Action, Envelope};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::hardware::Actuator;

/// Executes commands received from the controller
pub struct CommandExecutor {
    actuator: Arc<dyn Actuator>,
}

impl CommandExecutor {
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }

    /// Run one command; returns the reply to send back, if any
    pub async fn execute(&self, envelope: &Envelope) -> Option<Envelope> {
        match &envelope.action {
            Action::Press => {
                let scheduled = envelope
                    .params
                    .get("scheduled")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                info!(
                    req_id = envelope.correlation_id.as_deref().unwrap_or("-"),
                    scheduled, "Executing press"
                );

                let result = self.actuator.press().await;
                if !result {
                    warn!("Press did not complete");
                }
                Some(Envelope::press_result(result, envelope.correlation_id.clone()))
            }
            Action::Ping => {
                let pong = Envelope::new(Action::Pong).param("timestamp", now_ms() / 1000);
                Some(match &envelope.correlation_id {
                    Some(id) => pong.correlated(id.clone()),
                    None => pong,
                })
            }
            Action::Pong | Action::Heartbeat | Action::PressResult | Action::Connect => {
                debug!(action = %envelope.action, "No reply needed");
                None
            }
            Action::Unknown(name) => {
                warn!(action = %name, "Unknown command");
                None
            }
        }
    }
}
