//! Relay binary: polls the outbox table and publishes pending facts until
//! interrupted.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use surveyline_broker::EventBroker;
use surveyline_relay::{Config, OutboxRelay, OutboxStore};
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
        brokers = %config.broker.brokers,
        batch_size = config.relay.batch_size,
        poll_interval_ms = config.relay.poll_interval_ms,
        max_attempts = config.relay.max_attempts,
        "Starting outbox relay"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await
        .context("failed to connect to Postgres")?;

    let broker = EventBroker::builder()
        .brokers(&config.broker.brokers)
        .timeout(Duration::from_millis(config.broker.publish_timeout_ms))
        .connect_attempts(config.broker.connect_attempts)
        .build()
        .context("failed to create broker client")?;
    broker.connect().await.context("brokers unreachable")?;

    let relay = OutboxRelay::new(
        OutboxStore::new(pool),
        Arc::new(broker),
        config.relay_config(),
    );
    relay.start().await;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("Shutdown signal received");
    relay.stop().await;

    match relay.metrics().await {
        Ok(m) => tracing::info!(
            pending = m.pending,
            exhausted = m.exhausted,
            processed = m.processed,
            "Outbox state at shutdown"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not read outbox metrics at shutdown"),
    }

    Ok(())
}
