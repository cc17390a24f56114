//! Session projection binary: consumes `runtime.sessions` until interrupted.

use anyhow::Context;
use surveyline_broker::EventBroker;
use surveyline_consumers::dedup::IdempotencyLedger;
use surveyline_consumers::session::SessionProjection;
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
        group = %config.session_group,
        topic = topics::RUNTIME_SESSIONS,
        "Starting session consumer"
    );

    let store = StateStore::new(&config.redis_url)
        .await
        .context("failed to connect to Redis")?;
    let ledger =
        IdempotencyLedger::new(store.clone(), config.session_group.clone(), config.ttl.dedup());
    let projection = SessionProjection::new(
        store,
        ledger,
        config.ttl.session_record(),
        config.ttl.session_metrics(),
        config.ttl.stats_window(),
    );

    let broker = EventBroker::builder()
        .brokers(&config.brokers)
        .build()
        .context("failed to create broker client")?;
    broker.connect().await.context("brokers unreachable")?;
    let consumer = broker
        .consumer(&config.session_group)
        .context("failed to create consumer")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    consumer
        .run(&[topics::RUNTIME_SESSIONS], &projection, shutdown_rx)
        .await
        .context("consumer loop failed")?;
    Ok(())
}
