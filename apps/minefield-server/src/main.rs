use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::{error, info};

use minefield_server::clock::Clock;
use minefield_server::config::{Cli, ServerConfig};
use minefield_server::dispatch::Dispatcher;
use minefield_server::players::JsonPlayerStore;
use minefield_server::registry::SessionRegistry;
use minefield_server::render::RenderScheduler;
use minefield_server::reward::RewardEngine;
use minefield_server::routes::{router, AppState};
use minefield_server::service::GameService;
use minefield_server::telemetry::Telemetry;
use minefield_server::transport::{ChatTransport, LogTransport};
use minefield_server::webhook::WebhookTransport;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    let telemetry = Telemetry::init(&config.log_filter)?;
    info!(
        listen_addr = %config.listen_addr,
        webhook = config.api_base.is_some(),
        snapshot = ?config.registry.snapshot_path,
        "starting minefield server"
    );

    run(config, telemetry.metrics_handle()).await
}

async fn run(config: ServerConfig, metrics: PrometheusHandle) -> Result<()> {
    let clock = Clock::new();
    let transport: Arc<dyn ChatTransport> = match &config.api_base {
        Some(base) => Arc::new(
            WebhookTransport::new(base.clone(), config.api_timeout)
                .context("failed to build webhook client")?,
        ),
        None => Arc::new(LogTransport::new()),
    };
    let players = JsonPlayerStore::open(&config.players_path)
        .with_context(|| format!("failed to open {}", config.players_path.display()))?;
    let rewards = Arc::new(RewardEngine::new(Arc::new(players), clock));
    let registry = SessionRegistry::restore(config.registry.clone(), clock);
    let renderer = RenderScheduler::new(Arc::clone(&transport), clock, config.render);
    let service = Arc::new(GameService::new(
        registry.clone(),
        renderer,
        rewards,
        transport,
        config.max_games_per_user,
    ));

    let (dispatcher, dispatch_handle) = Dispatcher::spawn(service, config.dispatch);
    let collector = registry.spawn_collector();
    let app = router(AppState::new(dispatcher, registry.clone(), Some(metrics)));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!(addr = %config.listen_addr, sessions = registry.count(), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server shutdown with error")?;

    collector.abort();
    dispatch_handle.abort();
    match registry.flush().await {
        Ok(sessions) => info!(sessions, "final session snapshot written"),
        Err(err) => error!(error = %err, "final session snapshot failed"),
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");
}
