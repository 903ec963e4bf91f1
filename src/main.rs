//! pricefeed binary
//!
//! Loads configuration, wires the sources into a `PriceEngine` and runs one
//! aggregation task per symbol until Ctrl-C.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use pricefeed::config::AppConfig;
use pricefeed::logging::init_logging;
use pricefeed::metrics::MetricsFacade;
use pricefeed::oracle::{build_source, FetchCoordinator, PriceEngine};
use pricefeed::persistence::JsonFileAccuracyStore;
use pricefeed::publish::DryRunPublisher;
use pricefeed::secrets::EnvCredentialStore;
use pricefeed::service;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("🔄 Starting pricefeed {}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config);

    let mut sources = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let client = build_source(source)
            .with_context(|| format!("Failed to build client for source {}", source.name))?;
        info!(source = %source.name, kind = %source.kind, weight = source.weight, "✅ Source ready");
        sources.push((source.clone(), client));
    }
    let fetcher = FetchCoordinator::new(
        sources,
        Arc::new(EnvCredentialStore::new()),
        config.oracle.future_tolerance_ms,
    );

    if !config.publisher.dry_run {
        warn!("No chain client is linked into this binary; publishing in dry-run mode");
    }
    let store = JsonFileAccuracyStore::new(&config.persistence.data_dir)?;

    let engine = Arc::new(PriceEngine::new(
        config.oracle.clone(),
        config.filter,
        fetcher,
        Arc::new(store),
        Arc::new(DryRunPublisher),
        Arc::new(MetricsFacade),
    ));

    let restored = engine.load_accuracy(&config.oracle.symbols).await;
    info!(restored, "📂 Accuracy snapshots loaded");

    let handle = service::start(
        engine.clone(),
        &config.oracle.symbols,
        config.oracle.update_interval(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Ctrl-C received, shutting down");
    handle.shutdown().await;

    Ok(())
}
