//! End-to-end over a real TCP listener: handshake, correlated press,
//! scheduled press, disconnect

use fingerbot_server::schedule::{AnchoredClock, ScheduleEngine, ScheduleRecord};
use fingerbot_server::session::{identify_frame, serve_stream};
use fingerbot_server::{CommandDispatcher, DispatchError, TransportRegistry};
use fingerbot_shared::{codec, Action, Envelope, Frame, FrameDecoder, Params};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

struct Device {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl Device {
    async fn connect(addr: std::net::SocketAddr, device_id: &str) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&identify_frame(device_id).unwrap()).await.unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    async fn recv(&mut self) -> Envelope {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(frame) = self.decoder.decode_next().unwrap() {
                match frame {
                    Frame::Command(envelope) => return envelope,
                    other => panic!("unexpected frame {other:?}"),
                }
            }
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "server closed the connection");
            self.decoder.extend(&buf[..n]);
        }
    }

    async fn send(&mut self, envelope: &Envelope) {
        self.stream.write_all(&codec::encode(envelope).unwrap()).await.unwrap();
    }
}

async fn start() -> (std::net::SocketAddr, Arc<TransportRegistry>, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let registry = Arc::new(TransportRegistry::new());
    let shutdown = CancellationToken::new();
    tokio::spawn(serve_stream(
        listener,
        registry.clone(),
        Duration::from_secs(5),
        shutdown.clone(),
    ));
    (addr, registry, shutdown)
}

async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn correlated_press_round_trip() {
    let (addr, registry, shutdown) = start().await;
    let dispatcher = CommandDispatcher::new(registry.clone());

    let mut device = Device::connect(addr, "bot-1").await;
    wait_until(|| {
        let registry = registry.clone();
        async move { registry.lookup("bot-1").await.is_some() }
    })
    .await;

    let call = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .send_and_await("bot-1", Action::Press, Params::new(), Duration::from_secs(2))
                .await
        }
    });

    let press = device.recv().await;
    assert_eq!(press.action, Action::Press);
    let req_id = press.correlation_id.clone().expect("correlated press");

    // Unsolicited traffic is ignored, the matching reply resolves the call
    device.send(&Envelope::new(Action::Heartbeat)).await;
    device.send(&Envelope::press_result(true, Some(req_id))).await;

    let response = call.await.unwrap().unwrap();
    assert_eq!(response.action, Action::PressResult);
    assert_eq!(response.result_flag(), Some(true));

    // Disconnect: the binding goes away and sends report offline
    drop(device);
    wait_until(|| {
        let registry = registry.clone();
        async move { registry.lookup("bot-1").await.is_none() }
    })
    .await;
    let err = dispatcher
        .send("bot-1", Action::Press, Params::new())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::Offline(_)));

    shutdown.cancel();
}

#[tokio::test]
async fn scheduled_press_reaches_device() {
    let (addr, registry, shutdown) = start().await;
    let dispatcher = CommandDispatcher::new(registry.clone());

    let mut device = Device::connect(addr, "bot-2").await;
    wait_until(|| {
        let registry = registry.clone();
        async move { registry.lookup("bot-2").await.is_some() }
    })
    .await;

    // Clock sits a hair before 09:00 so the schedule fires almost at once
    let clock = Arc::new(AnchoredClock::new("2024-05-01T08:59:59.900Z".parse().unwrap()));
    let engine = ScheduleEngine::with_clock(Arc::new(dispatcher), chrono_tz::Tz::UTC, clock);
    engine
        .arm(&ScheduleRecord::new("s1", "bot-2", "press", "09:00", "Daily"))
        .await
        .unwrap();

    let press = tokio::time::timeout(Duration::from_secs(5), device.recv())
        .await
        .unwrap();
    assert_eq!(press.action, Action::Press);
    assert_eq!(press.params.get("scheduled"), Some(&serde_json::Value::Bool(true)));
    assert!(press.correlation_id.is_none());

    engine.shutdown().await;
    shutdown.cancel();
}

#[tokio::test]
async fn connection_without_identification_is_dropped() {
    let (addr, registry, shutdown) = start().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    let press = codec::encode(&Envelope::new(Action::Press)).unwrap();
    stream.write_all(&press).await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert_eq!(registry.count().await, 0);

    shutdown.cancel();
}
