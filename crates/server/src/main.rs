// crates/server/src/main.rs
//! Async report server binary.
//!
//! Builds the job registry from the environment, starts the periodic sweep,
//! and serves the Job Manager API.

use std::sync::Arc;

use anyhow::Result;
use async_report_jobs::Registry;
use async_report_server::{create_app, init_metrics, AppState, SampleRenderer, ServerConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,async_report_server=info,async_report_jobs=info".into()),
        )
        .init();

    init_metrics();

    let config = ServerConfig::from_env();
    tracing::info!(
        bind = %config.bind,
        scheduling = config.registry.scheduling_location_enabled,
        max_concurrent = ?config.registry.max_concurrent_renders,
        staging = ?config.registry.staging,
        "Starting async report server"
    );

    let registry = Arc::new(Registry::new(Arc::new(SampleRenderer), config.registry.clone()));
    let _sweeper = registry.spawn_sweeper(config.sweep_interval);

    let app = create_app(AppState::new(registry, config.manager.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    eprintln!(
        "\n  async-report v{} \u{2192} http://{}\n",
        env!("CARGO_PKG_VERSION"),
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
