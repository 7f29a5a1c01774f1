//! HTTP surface: WebSocket device endpoint, immediate sends and status

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fingerbot_shared::{Action, Params};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::command::CommandDispatcher;
use crate::error::DispatchError;
use crate::schedule::ScheduleEngine;
use crate::session::{self, TransportKind, TransportRegistry};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: CommandDispatcher,
    pub engine: ScheduleEngine,
    pub keepalive_interval: Duration,
}

impl AppState {
    pub fn registry(&self) -> &Arc<TransportRegistry> {
        self.dispatcher.registry()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/device/:device_id", get(device_ws))
        .route("/devices", get(list_devices))
        .route("/devices/:device_id/send-action", post(send_action))
        .route("/time", get(current_time))
        .with_state(state)
}

async fn device_ws(
    ws: WebSocketUpgrade,
    Path(device_id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    info!(device_id = %device_id, "WebSocket upgrade");
    let registry = state.registry().clone();
    let keepalive = state.keepalive_interval;
    ws.on_upgrade(move |socket| session::handle_socket(socket, device_id, registry, keepalive))
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct DeviceEntry {
    device_id: String,
    transport: TransportKind,
}

async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    let devices: Vec<DeviceEntry> = state
        .registry()
        .connected_devices()
        .await
        .into_iter()
        .map(|(device_id, transport)| DeviceEntry { device_id, transport })
        .collect();
    Json(devices)
}

#[derive(Debug, Deserialize)]
pub struct SendActionRequest {
    pub action: String,
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendActionQuery {
    /// Wait this long for the device's correlated response
    pub await_ms: Option<u64>,
}

async fn send_action(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Query(query): Query<SendActionQuery>,
    Json(request): Json<SendActionRequest>,
) -> Response {
    let name = request.action.trim();
    if name.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "message": "action is required"})),
        )
            .into_response();
    }
    let action = Action::from_name(name);

    match query.await_ms {
        Some(ms) => {
            let timeout = Duration::from_millis(ms);
            match state
                .dispatcher
                .send_and_await(&device_id, action, request.params, timeout)
                .await
            {
                Ok(response) => Json(json!({
                    "status": "sent",
                    "response": {
                        "action": response.action.name(),
                        "params": response.params,
                    },
                }))
                .into_response(),
                Err(e) => dispatch_failure(e),
            }
        }
        None => match state.dispatcher.send(&device_id, action, request.params).await {
            Ok(()) => Json(json!({"status": "sent"})).into_response(),
            Err(e) => dispatch_failure(e),
        },
    }
}

fn dispatch_failure(err: DispatchError) -> Response {
    let code = match err {
        DispatchError::Offline(_) => StatusCode::NOT_FOUND,
        DispatchError::TimedOut => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::Unsupported(_) | DispatchError::Codec(_) => StatusCode::BAD_REQUEST,
        DispatchError::Transport(_) | DispatchError::Disconnected => StatusCode::BAD_GATEWAY,
    };
    let body = json!({"status": err.label(), "message": err.to_string()});
    (code, Json(body)).into_response()
}

async fn current_time(State(state): State<AppState>) -> impl IntoResponse {
    let tz = state.engine.timezone();
    let now = state.engine.now().with_timezone(&tz);
    Json(json!({
        "time": now.to_rfc3339(),
        "timezone": tz.name(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::AnchoredClock;
    use crate::session::DeviceHandle;
    use axum::body::to_bytes;
    use chrono_tz::Tz;
    use serde_json::Value;
    use tokio::sync::mpsc;

    fn state() -> AppState {
        let registry = Arc::new(TransportRegistry::new());
        let dispatcher = CommandDispatcher::new(registry);
        let clock = Arc::new(AnchoredClock::new("2024-05-01T12:00:00Z".parse().unwrap()));
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let engine = ScheduleEngine::with_clock(Arc::new(dispatcher.clone()), tz, clock);
        AppState {
            dispatcher,
            engine,
            keepalive_interval: Duration::from_secs(30),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn press() -> Json<SendActionRequest> {
        Json(SendActionRequest {
            action: "press".into(),
            params: Params::new(),
        })
    }

    #[tokio::test]
    async fn test_send_action_offline() {
        let response = send_action(
            State(state()),
            Path("ghost".into()),
            Query(SendActionQuery::default()),
            press(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["status"], "offline");
    }

    #[tokio::test]
    async fn test_send_action_sent() {
        let state = state();
        let (tx, mut rx) = mpsc::channel(4);
        state.registry().bind(DeviceHandle::message("dev", tx)).await;

        let response = send_action(
            State(state.clone()),
            Path("dev".into()),
            Query(SendActionQuery::default()),
            press(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "sent"}));
        assert_eq!(rx.recv().await.unwrap(), r#"{"action":"press","params":{}}"#);
    }

    #[tokio::test]
    async fn test_await_on_message_transport_rejected() {
        let state = state();
        let (tx, _rx) = mpsc::channel(4);
        state.registry().bind(DeviceHandle::message("dev", tx)).await;

        let response = send_action(
            State(state),
            Path("dev".into()),
            Query(SendActionQuery { await_ms: Some(500) }),
            press(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "unsupported");
    }

    #[tokio::test]
    async fn test_empty_action_rejected() {
        let response = send_action(
            State(state()),
            Path("dev".into()),
            Query(SendActionQuery::default()),
            Json(SendActionRequest {
                action: " ".into(),
                params: Params::new(),
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_devices() {
        let state = state();
        let (tx, _rx) = mpsc::channel(4);
        state.registry().bind(DeviceHandle::message("dev", tx)).await;

        let response = list_devices(State(state)).await.into_response();
        assert_eq!(
            body_json(response).await,
            json!([{"device_id": "dev", "transport": "message"}])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_current_time_in_configured_zone() {
        let response = current_time(State(state())).await.into_response();
        let body = body_json(response).await;
        assert_eq!(body["timezone"], "Europe/Berlin");
        assert_eq!(body["time"], "2024-05-01T14:00:00+02:00");
    }
}
