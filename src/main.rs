// main.rs
use device_bridge::{
    commands::Bridge,
    config::Settings,
    create_router,
    devices::DeviceStore,
    models::AppState,
    serial::{SerialLink, TtyConnector},
    speech::{SpeechPipeline, transcriber},
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    if settings.metrics.enabled {
        device_bridge::metrics::setup_metrics(settings.metrics.port)?;
    }

    let store = Arc::new(DeviceStore::new());
    let link = SerialLink::new(Box::new(TtyConnector), store.clone());
    let bridge = Bridge::new(
        link,
        store.clone(),
        settings.serial.ack_timeout(),
        settings.serial.require_ack,
    );

    tracing::info!("Attempting to connect to device on {}", settings.serial.path);
    if let Err(e) = bridge
        .link()
        .open(&settings.serial.path, settings.serial.baud_rate)
        .await
    {
        tracing::warn!("Continuing without device: {}", e);
    }

    let transcriber = transcriber::from_settings(&settings.speech)?;
    let state = Arc::new(AppState {
        store,
        bridge: bridge.clone(),
        speech: SpeechPipeline::new(transcriber),
        serial_path: settings.serial.path.clone(),
        max_upload_bytes: settings.speech.max_upload_bytes,
    });

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.server.address)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind address: {}", e))?;

    tracing::info!("Server started on {}", settings.server.address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    tracing::info!("Shutting down gracefully...");
    bridge.link().close().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
