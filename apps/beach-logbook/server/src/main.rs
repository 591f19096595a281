use anyhow::{Context, Result};
use beach_logbook_server::{
    demo::spawn_demo, router, telemetry::Telemetry, AppState, ChannelHub, Cli, ServerConfig,
};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        subscriber_buffer = config.hub.per_subscriber_buffer,
        demo_channels = ?config.demo.as_ref().map(|demo| &demo.channels),
        "starting beach-logbook server"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let hub = ChannelHub::new(config.hub.clone());
    let state = AppState::new(hub, Some(metrics));

    let demo_handle = config
        .demo
        .clone()
        .map(|demo| spawn_demo(state.clone(), demo));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;

    info!("beach-logbook listening on {}", config.listen_addr);

    let graceful =
        axum::serve(listener, router(state.clone())).with_graceful_shutdown(shutdown_signal());
    graceful.await.context("server shutdown with error")?;

    info!(
        grace_seconds = config.shutdown_grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    if let Some(handle) = demo_handle {
        handle.abort();
    }
    tokio::time::sleep(config.shutdown_grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
