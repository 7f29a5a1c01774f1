//! Message transport: one JSON envelope per WebSocket text message

use super::registry::{DeviceHandle, TransportRegistry};
use axum::extract::ws::{Message, WebSocket};
use fingerbot_shared::{codec, now_ms, Action, Envelope, Frame};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const OUTBOUND_QUEUE: usize = 32;

/// Serve an upgraded socket for `device_id` until either side closes it or
/// a newer connection replaces it
pub async fn handle_socket(
    socket: WebSocket,
    device_id: String,
    registry: Arc<TransportRegistry>,
    keepalive_interval: Duration,
) {
    let (sink, stream) = socket.split();
    serve_messages(sink, stream, device_id, registry, keepalive_interval).await;
}

/// Connection loop over any message sink and stream pair
pub async fn serve_messages<Si, St, E>(
    mut sink: Si,
    mut stream: St,
    device_id: String,
    registry: Arc<TransportRegistry>,
    keepalive_interval: Duration,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: fmt::Display,
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);

    let handle = DeviceHandle::message(device_id.clone(), tx);
    registry.bind(handle.clone()).await;
    let closed = handle.close_token();

    let mut keepalive = tokio::time::interval(keepalive_interval);
    keepalive.tick().await;

    loop {
        tokio::select! {
            _ = closed.cancelled() => {
                debug!(device_id = %device_id, "Message connection closed locally");
                break;
            }
            Some(text) = rx.recv() => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!(device_id = %device_id, error = %e, "WebSocket write failed");
                    break;
                }
            }
            _ = keepalive.tick() => {
                if let Err(e) = handle.send(&Envelope::new(Action::Ping)).await {
                    debug!(device_id = %device_id, error = %e, "Keepalive not queued");
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(&device_id, &text) {
                        if let Err(e) = handle.send(&reply).await {
                            warn!(device_id = %device_id, error = %e, "Reply not queued");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                // Control frames are answered by the WebSocket layer
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(device_id = %device_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    }

    registry.unbind(&device_id, &handle).await;
    handle.close();
    if let Err(e) = sink.close().await {
        debug!(device_id = %device_id, error = %e, "WebSocket close failed");
    }
    info!(device_id = %device_id, "Message connection ended");
}

/// Handle one inbound text message, returning the reply to send, if any
pub fn handle_text(device_id: &str, text: &str) -> Option<Envelope> {
    let envelope = match codec::decode_message(text) {
        Ok(Frame::Command(envelope)) => envelope,
        Ok(Frame::Identify { device_id: announced }) => {
            debug!(%device_id, %announced, "Identification on message transport ignored");
            return None;
        }
        Err(e) => {
            warn!(%device_id, error = %e, "Dropping undecodable message");
            return None;
        }
    };

    match envelope.action {
        Action::Ping => {
            let mut pong = Envelope::new(Action::Pong).param("timestamp", now_ms() / 1000);
            pong.correlation_id = envelope.correlation_id;
            Some(pong)
        }
        Action::Connect => {
            let version = envelope
                .params
                .get("version")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            info!(%device_id, %version, "Device announced");
            None
        }
        Action::PressResult => {
            info!(%device_id, result = ?envelope.result_flag(), "Press result");
            None
        }
        Action::Pong | Action::Heartbeat => {
            debug!(%device_id, action = %envelope.action, "Keepalive");
            None
        }
        _ => {
            debug!(%device_id, action = %envelope.action, "Unhandled message");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as chan;
    use tokio::task::JoinHandle;

    type Inbound = chan::UnboundedSender<Result<Message, chan::SendError>>;
    type Outbound = chan::UnboundedReceiver<Message>;

    /// Run a session over in-memory channels standing in for the socket
    fn session(registry: &Arc<TransportRegistry>, keepalive: Duration) -> (Inbound, Outbound, JoinHandle<()>) {
        let (in_tx, in_rx) = chan::unbounded();
        let (out_tx, out_rx) = chan::unbounded();
        let task = tokio::spawn(serve_messages(
            out_tx,
            in_rx,
            "dev".to_string(),
            registry.clone(),
            keepalive,
        ));
        (in_tx, out_rx, task)
    }

    async fn bound(registry: &TransportRegistry) -> DeviceHandle {
        loop {
            if let Some(handle) = registry.lookup("dev").await {
                return handle;
            }
            tokio::task::yield_now().await;
        }
    }

    async fn next_envelope(out: &mut Outbound) -> Envelope {
        match out.next().await {
            Some(Message::Text(text)) => match codec::decode_message(&text).unwrap() {
                Frame::Command(envelope) => envelope,
                other => panic!("unexpected frame {other:?}"),
            },
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_binds_pings_and_unbinds_on_close() {
        let registry = Arc::new(TransportRegistry::new());
        let (inbound, mut outbound, task) = session(&registry, Duration::from_secs(30));

        let handle = bound(&registry).await;
        assert_eq!(handle.kind(), crate::session::TransportKind::Message);

        let started = tokio::time::Instant::now();
        assert_eq!(next_envelope(&mut outbound).await.action, Action::Ping);
        assert!(started.elapsed() >= Duration::from_secs(30));

        inbound
            .unbounded_send(Ok(Message::Text(r#"{"action":"ping","params":{"req_id":"c1"}}"#.into())))
            .unwrap();
        let pong = next_envelope(&mut outbound).await;
        assert_eq!(pong.action, Action::Pong);
        assert_eq!(pong.correlation_id.as_deref(), Some("c1"));

        inbound.unbounded_send(Ok(Message::Close(None))).unwrap();
        task.await.unwrap();
        assert!(registry.lookup("dev").await.is_none());
        assert!(handle.is_closed());
        assert!(outbound.next().await.is_none());
    }

    #[tokio::test]
    async fn test_session_forwards_dispatched_commands() {
        let registry = Arc::new(TransportRegistry::new());
        let (inbound, mut outbound, task) = session(&registry, Duration::from_secs(30));

        let handle = bound(&registry).await;
        handle
            .send(&Envelope::new(Action::Press).param("scheduled", true))
            .await
            .unwrap();
        let press = next_envelope(&mut outbound).await;
        assert_eq!(press.action, Action::Press);
        assert_eq!(press.params.get("scheduled"), Some(&true.into()));

        // Peer going away without a close frame ends the session too
        drop(inbound);
        task.await.unwrap();
        assert!(registry.lookup("dev").await.is_none());
    }

    #[tokio::test]
    async fn test_session_replaced_by_rebind() {
        let registry = Arc::new(TransportRegistry::new());
        let (_inbound, mut outbound, task) = session(&registry, Duration::from_secs(30));
        let old = bound(&registry).await;

        let (tx, _rx) = mpsc::channel(8);
        let newer = DeviceHandle::message("dev", tx);
        registry.bind(newer.clone()).await;

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("replaced session ends")
            .unwrap();
        assert!(old.is_closed());
        // The ended session must not remove the newer binding
        assert_eq!(registry.lookup("dev").await, Some(newer));
        assert!(outbound.next().await.is_none());
    }

    #[test]
    fn test_ping_gets_pong() {
        let reply = handle_text("dev", r#"{"action":"ping","params":{}}"#).unwrap();
        assert_eq!(reply.action, Action::Pong);
        assert!(reply.params.contains_key("timestamp"));
        assert!(reply.correlation_id.is_none());
    }

    #[test]
    fn test_ping_correlation_echoed() {
        let reply = handle_text("dev", r#"{"action":"ping","params":{"req_id":"k1"}}"#).unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("k1"));
    }

    #[test]
    fn test_announcements_and_results_not_answered() {
        assert!(handle_text(
            "dev",
            r#"{"action":"connect","params":{"device_id":"dev","version":"1.0.0"}}"#
        )
        .is_none());
        assert!(handle_text("dev", r#"{"action":"press_result","params":{"result":true}}"#).is_none());
        assert!(handle_text("dev", r#"{"action":"dance","params":{}}"#).is_none());
    }

    #[test]
    fn test_malformed_text_dropped() {
        assert!(handle_text("dev", "not json").is_none());
        assert!(handle_text("dev", r#"{"params":{}}"#).is_none());
        assert!(handle_text("dev", r#"{"device_id":"dev"}"#).is_none());
    }
}
