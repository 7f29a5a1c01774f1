use anyhow::{Context, Result};
use fingerbot_server::http::{self, AppState};
use fingerbot_server::schedule::{self, ScheduleEngine};
use fingerbot_server::session::{self, TransportRegistry};
use fingerbot_server::{CommandDispatcher, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    info!(?config, "Starting fingerbot server");

    let registry = Arc::new(TransportRegistry::new());
    let dispatcher = CommandDispatcher::new(registry.clone());
    let engine = ScheduleEngine::new(Arc::new(dispatcher.clone()), config.timezone);

    if let Some(ref path) = config.schedules_path {
        match schedule::load_records(path) {
            Ok(records) => {
                engine.rebuild(records).await;
            }
            Err(e) => warn!(error = %e, "Could not load schedules, starting with none"),
        }
    }

    let shutdown = CancellationToken::new();

    let stream_listener = TcpListener::bind(config.stream_addr)
        .await
        .with_context(|| format!("failed to bind stream transport at {}", config.stream_addr))?;
    let stream_task = tokio::spawn(session::serve_stream(
        stream_listener,
        registry.clone(),
        config.handshake_timeout,
        shutdown.clone(),
    ));

    let app = http::router(AppState {
        dispatcher,
        engine: engine.clone(),
        keepalive_interval: config.keepalive_interval,
    });
    let http_listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP server at {}", config.http_addr))?;
    info!(addr = %config.http_addr, "HTTP server listening");

    let http_shutdown = shutdown.clone();
    let http_task = tokio::spawn(async move {
        axum::serve(http_listener, app)
            .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
            .await
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    shutdown.cancel();
    engine.shutdown().await;

    if let Err(e) = stream_task.await {
        warn!(error = %e, "Stream transport task failed");
    }
    match http_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
    }

    info!("Server stopped");
    Ok(())
}
