//! Quota projection binary: consumes `runtime.quota` until interrupted.

use anyhow::Context;
use surveyline_broker::EventBroker;
use surveyline_consumers::dedup::IdempotencyLedger;
use surveyline_consumers::quota::QuotaProjection;
use surveyline_consumers::Config;
use surveyline_core::router::topics;
use surveyline_state::StateStore;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        brokers = %config.brokers,
        group = %config.quota_group,
        topic = topics::RUNTIME_QUOTA,
        "Starting quota consumer"
    );

    let store = StateStore::new(&config.redis_url)
        .await
        .context("failed to connect to Redis")?;
    let ledger =
        IdempotencyLedger::new(store.clone(), config.quota_group.clone(), config.ttl.dedup());
    let projection = QuotaProjection::new(store, ledger, config.ttl.quota_marker());

    let broker = EventBroker::builder()
        .brokers(&config.brokers)
        .build()
        .context("failed to create broker client")?;
    broker.connect().await.context("brokers unreachable")?;
    let consumer = broker
        .consumer(&config.quota_group)
        .context("failed to create consumer")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    consumer
        .run(&[topics::RUNTIME_QUOTA], &projection, shutdown_rx)
        .await
        .context("consumer loop failed")?;
    Ok(())
}
