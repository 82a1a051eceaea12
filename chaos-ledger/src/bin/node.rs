//! Chaos ledger node binary

use anyhow::Context;
use chaos_ledger::{Config, Generator, Ledger, Metrics};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration: CHAOS_CONFIG names a TOML file, otherwise env vars
    let config = match std::env::var("CHAOS_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env().context("reading environment")?,
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        store = ?config.store_path,
        whitening = %config.generation.whitening,
        "Starting chaos ledger node"
    );

    let metrics = Arc::new(Metrics::new().context("registering metrics")?);
    let ledger = Arc::new(
        Ledger::open(&config)
            .context("opening ledger")?
            .with_metrics(metrics.clone()),
    );
    let generator = Generator::from_config(ledger.clone(), &config)?.with_metrics(metrics.clone());

    let defaults = generator.defaults();
    let entropy = defaults.entropy_spec(None, config.entropy.default_urls.clone());
    tracing::info!(
        blocks = ledger.len(),
        chain_valid = ledger.validate_chain(),
        entropy_mode = entropy.mode_name(),
        default_sources = entropy.urls().len(),
        output_format = ?defaults.output_format(),
        max_bits = defaults.normalize_bit_count(i64::MAX),
        "Ledger ready"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down chaos ledger node");
    ledger.persist().context("final snapshot")?;
    tracing::debug!(metrics = %metrics.gather_text(), "Final metrics");
    Ok(())
}
