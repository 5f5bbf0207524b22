use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use feed_client::{Credentials, FeedClient};
use feedbase_ingest::collector::Collector;
use feedbase_ingest::geocode::{Annotator, QuotaGuard};
use feedbase_ingest::logging;
use feedbase_ingest::pipeline::Pipeline;
use feedbase_ingest::session::Backoff;
use feedbase_ingest::settings::Cli;
use feedbase_store::{connect, ContentStore};
use geocode_client::GoogleGeocoder;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Cli::parse().resolve()?;
    logging::init(config.log_file.as_deref())?;

    info!(
        store_url = %config.store_url,
        db_name = %config.db_name,
        endpoint = %config.endpoint,
        parameters = ?config.parameters,
        "Feedbase collector starting..."
    );

    let credentials = Credentials::read_file(&config.credentials)
        .with_context(|| format!("Failed to load credentials: {}", config.credentials.display()))?;
    let client = FeedClient::new(credentials, config.auth_version)?;

    let backend = connect(&config.store_url, &config.db_name)?;
    let store = ContentStore::open(backend)
        .await
        .with_context(|| format!("Failed to open database {}", config.db_name))?;

    let mut pipeline = Pipeline::new(store, config.pipeline);
    if config.geocode {
        let geocoder = GoogleGeocoder::from_env().context("Geocoding requires an API key")?;
        pipeline = pipeline.with_annotator(Annotator::new(
            Arc::new(geocoder),
            Arc::new(QuotaGuard::new()),
        ));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut collector = Collector::new(Arc::new(client), pipeline, config.endpoint, shutdown_rx)
        .with_params(config.parameters)
        .with_mode(config.mode)
        .with_backoff(Backoff::for_auth(config.auth_version));
    let report = collector.run().await;

    println!(
        "{} processed, {} skipped, {} filtered, {} failed ({})",
        report.tally.processed,
        report.tally.skipped,
        report.tally.filtered,
        report.tally.failed,
        report.reason
    );
    if report.reason.is_failure() {
        std::process::exit(1);
    }
    Ok(())
}
