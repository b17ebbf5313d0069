//! MQTT catalog collector
//!
//! Runs one collection pass: connects to every broker listed in
//! `BROKERS_CONFIG`, samples the first message of each topic for
//! `COLLECTION_DURATION`, and hands the samples to the configured sink.
//! Ctrl-C stops collection early; sessions still drain before exit.

use anyhow::{Context, Result};
use catalog_collector::{CollectorConfig, Coordinator, HttpSink, MqttConnector, SinkTarget};
use catalog_core::{SampleSink, SqlCatalogStore, StoreSink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = CollectorConfig::from_env()
        .await
        .context("Failed to load collector configuration")?;
    info!(brokers = config.brokers.len(), duration = ?config.collection_duration, "collector starting");

    let sink = build_sink(&config.sink).await?;
    let coordinator = Coordinator::new(
        config.brokers,
        config.collection_duration,
        Arc::new(MqttConnector::new()),
        sink,
    )
    .context("Invalid collection setup")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping collection");
            interrupt.cancel();
        }
    });

    let summary = coordinator.run(&cancel).await;

    for report in &summary.reports {
        info!(
            broker_id = %report.broker_id,
            topics = report.topics_sampled,
            delivered = report.samples_delivered,
            failures = report.delivery_failures,
            "broker done"
        );
    }
    for failure in &summary.failures {
        warn!(broker_id = %failure.broker_id, error = %failure.error, "broker skipped");
    }
    info!(topics = summary.topics_sampled(), "collection complete");

    Ok(())
}

async fn build_sink(target: &SinkTarget) -> Result<Arc<dyn SampleSink>> {
    match target {
        SinkTarget::Http { base_url } => {
            let sink = HttpSink::new(base_url).context("Failed to build HTTP client")?;
            Ok(Arc::new(sink))
        }
        SinkTarget::Database { url } => {
            let store = SqlCatalogStore::connect(url)
                .await
                .context("Failed to open catalog database")?;
            store.migrate().await.context("Failed to migrate catalog schema")?;
            Ok(Arc::new(StoreSink::new(Arc::new(store))))
        }
    }
}
