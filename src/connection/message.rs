//! Controller connection over the WebSocket endpoint

use anyhow::{anyhow, Result};
use fingerbot_shared::{codec, Action, Envelope, Frame};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use super::manager::{ConnectionConfig, ConnectionEvent};

/// Version reported in the `connect` announcement
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Announce the device, then pump outbound envelopes and inbound messages.
///
/// The controller identifies the device by the URL path and keeps the link
/// alive with its own `ping` actions, so no heartbeat is sent here.
pub(super) async fn handle_message_connection<S>(
    socket: WebSocketStream<S>,
    config: &ConnectionConfig,
    outbound_rx: &mut mpsc::Receiver<Envelope>,
    event_tx: &mpsc::Sender<ConnectionEvent>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();

    let announce = Envelope::new(Action::Connect)
        .param("device_id", config.device_id.clone())
        .param("version", FIRMWARE_VERSION);
    sink.send(Message::Text(codec::encode_message(&announce)?)).await?;

    loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(envelope) => sink.send(Message::Text(codec::encode_message(&envelope)?)).await?,
                None => {
                    if let Err(e) = sink.close().await {
                        debug!(error = %e, "WebSocket close failed");
                    }
                    return Ok(());
                }
            },

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match codec::decode_message(&text) {
                    Ok(Frame::Command(envelope)) => {
                        let _ = event_tx.send(ConnectionEvent::Received(envelope)).await;
                    }
                    Ok(Frame::Identify { device_id }) => {
                        debug!(%device_id, "Ignoring identify message from controller");
                    }
                    Err(e) => warn!(error = %e, "Dropping undecodable message"),
                },
                Some(Ok(Message::Close(_))) | None => return Err(anyhow!("Server closed connection")),
                // Protocol pings are answered by the WebSocket layer
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::connection::ConnectionManager;
    use crate::transport::MessageConnector;

    use super::*;
    use async_trait::async_trait;
    use tokio::io::DuplexStream;
    use tokio::sync::Mutex;
    use tokio_tungstenite::tungstenite::protocol::Role;

    /// Hands out queued in-memory WebSocket client ends
    struct DuplexWsConnector {
        streams: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
    }

    #[async_trait]
    impl MessageConnector for DuplexWsConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> Result<WebSocketStream<DuplexStream>> {
            let stream = self
                .streams
                .lock()
                .await
                .try_recv()
                .map_err(|_| anyhow!("connection refused"))?;
            Ok(WebSocketStream::from_raw_socket(stream, Role::Client, None).await)
        }

        fn name(&self) -> &'static str {
            "ws-duplex"
        }
    }

    fn manager() -> (ConnectionManager, mpsc::UnboundedSender<DuplexStream>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = DuplexWsConnector {
            streams: Mutex::new(rx),
        };
        (
            ConnectionManager::websocket(connector, ConnectionConfig::new("AA:BB:CC:00:11:22")),
            tx,
        )
    }

    async fn queue(tx: &mpsc::UnboundedSender<DuplexStream>) -> WebSocketStream<DuplexStream> {
        let (device, controller) = tokio::io::duplex(4096);
        tx.send(device).unwrap();
        WebSocketStream::from_raw_socket(controller, Role::Server, None).await
    }

    async fn next_envelope(controller: &mut WebSocketStream<DuplexStream>) -> Envelope {
        loop {
            match controller.next().await {
                Some(Ok(Message::Text(text))) => match codec::decode_message(&text).unwrap() {
                    Frame::Command(envelope) => return envelope,
                    other => panic!("unexpected frame {other:?}"),
                },
                Some(Ok(_)) => continue,
                other => panic!("unexpected message {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_announces_then_relays_commands() {
        let (mut manager, tx) = manager();
        let mut controller = queue(&tx).await;

        assert_eq!(
            manager.recv().await,
            Some(ConnectionEvent::Connected { transport: "ws-duplex" })
        );

        let announce = next_envelope(&mut controller).await;
        assert_eq!(announce.action, Action::Connect);
        assert_eq!(
            announce.params.get("device_id").and_then(|v| v.as_str()),
            Some("AA:BB:CC:00:11:22")
        );
        assert_eq!(
            announce.params.get("version").and_then(|v| v.as_str()),
            Some(FIRMWARE_VERSION)
        );

        let press = Envelope::new(Action::Press).param("scheduled", true);
        controller
            .send(Message::Text(codec::encode_message(&press).unwrap()))
            .await
            .unwrap();
        assert_eq!(manager.recv().await, Some(ConnectionEvent::Received(press)));

        manager.send(Envelope::press_result(true, None)).await.unwrap();
        let reply = next_envelope(&mut controller).await;
        assert_eq!(reply.action, Action::PressResult);
        assert_eq!(reply.result_flag(), Some(true));
    }

    #[tokio::test]
    async fn test_undecodable_text_is_not_fatal() {
        let (mut manager, tx) = manager();
        let mut controller = queue(&tx).await;
        manager.recv().await;
        next_envelope(&mut controller).await;

        controller.send(Message::Text("not json".into())).await.unwrap();
        let ping = Envelope::new(Action::Ping);
        controller
            .send(Message::Text(codec::encode_message(&ping).unwrap()))
            .await
            .unwrap();
        assert_eq!(manager.recv().await, Some(ConnectionEvent::Received(ping)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_close() {
        let (mut manager, tx) = manager();
        let mut controller = queue(&tx).await;
        manager.recv().await;
        next_envelope(&mut controller).await;

        controller.close(None).await.unwrap();
        assert!(matches!(
            manager.recv().await,
            Some(ConnectionEvent::Disconnected { .. })
        ));
        assert!(matches!(
            manager.recv().await,
            Some(ConnectionEvent::ConnectionFailed { .. })
        ));

        let mut controller = queue(&tx).await;
        assert_eq!(
            manager.recv().await,
            Some(ConnectionEvent::Connected { transport: "ws-duplex" })
        );
        assert_eq!(next_envelope(&mut controller).await.action, Action::Connect);
    }
}
