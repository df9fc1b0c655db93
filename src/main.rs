use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod api;
mod artifact;
mod config;
mod error;
mod lifecycle;
mod mapping;
mod model;

use api::AppState;
use artifact::{ArtifactFetcher, DriveFetcher};
use config::Config;
use lifecycle::{ModelManager, ModelPolicy};
use mapping::LookupTable;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // A missing or broken mapping is fatal: no request could ever succeed.
    let table = LookupTable::from_path(&config.mapping_path)?;

    let fetcher: Arc<dyn ArtifactFetcher> = Arc::new(
        DriveFetcher::new(
            &config.artifact_base_url,
            Duration::from_secs(config.fetch_timeout_secs),
        )
        .context("Failed to build artifact fetcher")?,
    );
    let model_path = config.model_path();
    info!(
        "Model '{}' via {} at {} (policy: {:?})",
        config.model_id,
        fetcher.name(),
        model_path.display(),
        config.model_policy
    );

    let models = ModelManager::new(config.model_policy, config.model_id.clone(), model_path, fetcher);
    if config.model_policy == ModelPolicy::Eager {
        models
            .preload()
            .await
            .context("Failed to load model at startup")?;
        info!("✅ Model loaded");
    }

    let state = AppState {
        table: Arc::new(table),
        models: Arc::new(models),
    };
    let app = api::router(state);

    let addr = config.listen_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Betsmart Prediction API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
