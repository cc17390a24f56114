//! Kafka/Redpanda broker client for the Surveyline pipeline.
//!
//! Wraps rdkafka behind the [`EventPublisher`] seam and a consumer-group
//! message loop:
//!
//! - [`EventBroker`]: producer lifecycle with a builder, connect verification
//!   with bounded retry, and keyed publishes carrying
//!   `{eventType, tenantId, version}` headers.
//! - [`GroupConsumer`]: a consumer bound to a named consumer group, so each
//!   logical consumer scales and restarts independently. Its message loop
//!   hands every decoded envelope to an [`EnvelopeHandler`] and advances the
//!   delivery position once the handler returns, **whether or not it failed**.
//!
//! # Delivery semantics
//!
//! The pipeline is at-least-once at the outbox→broker hand-off only. A
//! handler failure here is logged and the offset still commits; consumer-side
//! resilience depends on the projection logic being safe to skip or to later
//! reconcile. Per-partition order is preserved because the handler call for
//! message N completes before message N+1 is delivered.

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::time::Duration;
use surveyline_core::bus::{BusFuture, EnvelopeHandler, EventPublisher, PublishError};
use surveyline_core::envelope::{self, EventEnvelope, MessageHeaders};
use thiserror::Error;
use tokio::sync::watch;

/// Error types for broker lifecycle and subscription operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The client configuration itself is invalid. Never retried.
    #[error("invalid broker configuration: {0}")]
    Configuration(String),

    /// The brokers rejected our credentials. Never retried: retrying bad
    /// credentials only delays the operator page.
    #[error("broker authentication failed: {0}")]
    Authentication(String),

    /// The brokers could not be reached within the retry budget.
    #[error("failed to reach brokers at {brokers}: {reason}")]
    Connection {
        /// The bootstrap servers that were tried.
        brokers: String,
        /// Last transport error observed.
        reason: String,
    },

    /// A consumer-group subscription could not be established.
    #[error("failed to subscribe to {topics:?}: {reason}")]
    Subscription {
        /// Topics the subscription targeted.
        topics: Vec<String>,
        /// Broker-reported reason.
        reason: String,
    },
}

/// How a connect-time failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectFailure {
    /// Bad credentials or config: fail immediately.
    Fatal,
    /// Broker unreachable: retry with backoff.
    Transient,
}

/// Whether a Kafka error code indicates an authentication/authorization
/// problem rather than a transient transport failure.
const fn is_auth_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::Authentication
            | RDKafkaErrorCode::SaslAuthenticationFailed
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed
    )
}

fn classify_connect_error(err: &KafkaError) -> ConnectFailure {
    match err {
        KafkaError::ClientConfig(..) | KafkaError::ClientCreation(..) => ConnectFailure::Fatal,
        KafkaError::MetadataFetch(code) | KafkaError::Global(code) if is_auth_code(*code) => {
            ConnectFailure::Fatal
        }
        _ => ConnectFailure::Transient,
    }
}

/// Kafka/Redpanda broker client.
///
/// Create via [`EventBroker::builder`], then call [`EventBroker::connect`]
/// once at startup to verify reachability before the relay or a consumer
/// starts its loop.
pub struct EventBroker {
    /// Kafka producer for publishing envelopes.
    producer: FutureProducer,
    /// Broker addresses, kept for creating consumers.
    brokers: String,
    /// Per-record send timeout.
    timeout: Duration,
    /// Connect verification retry budget.
    connect_attempts: u32,
    /// Base delay between connect retries (grows linearly per attempt).
    connect_backoff: Duration,
    /// Offset reset policy for new consumer groups.
    auto_offset_reset: String,
}

impl std::fmt::Debug for EventBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroker")
            .field("brokers", &self.brokers)
            .field("timeout", &self.timeout)
            .field("connect_attempts", &self.connect_attempts)
            .field("connect_backoff", &self.connect_backoff)
            .field("auto_offset_reset", &self.auto_offset_reset)
            .finish_non_exhaustive()
    }
}

impl EventBroker {
    /// Create a builder for configuring the broker client.
    #[must_use]
    pub fn builder() -> EventBrokerBuilder {
        EventBrokerBuilder::default()
    }

    /// The configured bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Verify the brokers are reachable, retrying transient failures with
    /// backoff.
    ///
    /// Authentication and configuration failures are reported immediately and
    /// logged distinctly from transient network failures.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Authentication`] or
    /// [`BrokerError::Configuration`] without retrying, or
    /// [`BrokerError::Connection`] once the retry budget is exhausted.
    pub async fn connect(&self) -> Result<(), BrokerError> {
        let mut last_reason = String::new();

        for attempt in 1..=self.connect_attempts {
            match self.fetch_metadata().await {
                Ok(broker_count) => {
                    tracing::info!(
                        brokers = %self.brokers,
                        broker_count,
                        attempt,
                        "Connected to brokers"
                    );
                    return Ok(());
                }
                Err(err) => match classify_connect_error(&err) {
                    ConnectFailure::Fatal => {
                        tracing::error!(
                            brokers = %self.brokers,
                            error = %err,
                            "Broker authentication or configuration failure (not retrying)"
                        );
                        return Err(match &err {
                            KafkaError::ClientConfig(..) | KafkaError::ClientCreation(..) => {
                                BrokerError::Configuration(err.to_string())
                            }
                            _ => BrokerError::Authentication(err.to_string()),
                        });
                    }
                    ConnectFailure::Transient => {
                        last_reason = err.to_string();
                        tracing::warn!(
                            brokers = %self.brokers,
                            error = %err,
                            attempt,
                            max_attempts = self.connect_attempts,
                            "Brokers unreachable, retrying"
                        );
                        tokio::time::sleep(self.connect_backoff.saturating_mul(attempt)).await;
                    }
                },
            }
        }

        Err(BrokerError::Connection {
            brokers: self.brokers.clone(),
            reason: last_reason,
        })
    }

    /// Fetch cluster metadata on a blocking thread (rdkafka's metadata call
    /// is synchronous).
    async fn fetch_metadata(&self) -> Result<usize, KafkaError> {
        let producer = self.producer.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| metadata.brokers().len())
        })
        .await
        .map_err(|join_err| {
            KafkaError::ClientCreation(format!("metadata task failed: {join_err}"))
        })?
    }

    /// Publish an envelope to `topic` under partition key `key`.
    ///
    /// The JSON body is accompanied by `{eventType, tenantId, version}`
    /// headers so consumers can filter without deserializing.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Serialization`] if the envelope cannot be
    /// rendered, or [`PublishError::Publish`] if the broker rejects or times
    /// out the record.
    pub async fn publish(
        &self,
        topic: &str,
        key: &str,
        envelope: &EventEnvelope,
    ) -> Result<(), PublishError> {
        let body = envelope
            .to_json()
            .map_err(|e| PublishError::Serialization(e.to_string()))?;
        self.publish_raw(topic, key, body, envelope.headers()).await
    }

    /// Publish a pre-serialized body with explicit headers.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Publish`] if the broker rejects or times out
    /// the record.
    pub async fn publish_raw(
        &self,
        topic: &str,
        key: &str,
        body: Vec<u8>,
        headers: MessageHeaders,
    ) -> Result<(), PublishError> {
        let kafka_headers = OwnedHeaders::new()
            .insert(Header { key: envelope::header::EVENT_TYPE, value: Some(&headers.event_type) })
            .insert(Header { key: envelope::header::TENANT_ID, value: Some(&headers.tenant_id) })
            .insert(Header { key: envelope::header::VERSION, value: Some(&headers.version) });

        let record = FutureRecord::to(topic)
            .payload(&body)
            .key(key)
            .headers(kafka_headers);

        match self.producer.send(record, Timeout::After(self.timeout)).await {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic,
                    partition,
                    offset,
                    key,
                    event_type = %headers.event_type,
                    "Published event"
                );
                metrics::counter!("broker.published", "topic" => topic.to_string()).increment(1);
                Ok(())
            }
            Err((kafka_error, _)) => {
                tracing::error!(
                    topic,
                    key,
                    event_type = %headers.event_type,
                    error = %kafka_error,
                    "Failed to publish event"
                );
                metrics::counter!("broker.publish_failed", "topic" => topic.to_string())
                    .increment(1);
                Err(PublishError::Publish {
                    topic: topic.to_string(),
                    reason: kafka_error.to_string(),
                })
            }
        }
    }

    /// Create a consumer handle bound to a named consumer group.
    ///
    /// Each logical consumer uses its own group id (e.g.
    /// `session-consumer-group`) so it scales horizontally and restarts
    /// independently; partition assignment across instances is delegated to
    /// the broker's consumer-group rebalancing protocol.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Configuration`] if the consumer cannot be
    /// created from the current settings.
    pub fn consumer(&self, group_id: &str) -> Result<GroupConsumer, BrokerError> {
        // Manual commits: the position advances only after the handler has
        // seen the message, never before.
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| BrokerError::Configuration(format!("failed to create consumer: {e}")))?;

        Ok(GroupConsumer {
            consumer,
            group_id: group_id.to_string(),
        })
    }
}

impl EventPublisher for EventBroker {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        envelope: &'a EventEnvelope,
    ) -> BusFuture<'a, Result<(), PublishError>> {
        Box::pin(self.publish(topic, key, envelope))
    }

    fn publish_raw<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        body: Vec<u8>,
        headers: MessageHeaders,
    ) -> BusFuture<'a, Result<(), PublishError>> {
        Box::pin(self.publish_raw(topic, key, body, headers))
    }
}

/// Builder for configuring an [`EventBroker`].
#[derive(Default)]
pub struct EventBrokerBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    connect_attempts: Option<u32>,
    connect_backoff: Option<Duration>,
    auto_offset_reset: Option<String>,
}

impl EventBrokerBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1", or "all".
    ///
    /// Default: "all". The outbox already provides durability on our side;
    /// losing an acked publish is the one failure the relay cannot see.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none".
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the per-record send timeout. Default: 5 seconds.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the connect verification retry budget. Default: 5 attempts.
    #[must_use]
    pub const fn connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = Some(attempts);
        self
    }

    /// Set the base delay between connect retries. Default: 1 second,
    /// growing linearly per attempt.
    #[must_use]
    pub const fn connect_backoff(mut self, backoff: Duration) -> Self {
        self.connect_backoff = Some(backoff);
        self
    }

    /// Set where new consumer groups start reading: "earliest", "latest".
    ///
    /// Default: "latest".
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`EventBroker`].
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Configuration`] if brokers are unset or the
    /// producer cannot be created.
    pub fn build(self) -> Result<EventBroker, BrokerError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BrokerError::Configuration("brokers not configured".to_string()))?;

        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let compression = self.compression.unwrap_or_else(|| "none".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", &acks)
            .set("compression.type", &compression)
            .create()
            .map_err(|e| BrokerError::Configuration(format!("failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks = %acks,
            compression = %compression,
            "EventBroker created"
        );

        Ok(EventBroker {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            connect_attempts: self.connect_attempts.unwrap_or(5),
            connect_backoff: self.connect_backoff.unwrap_or(Duration::from_secs(1)),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "latest".to_string()),
        })
    }
}

/// A consumer bound to a named consumer group.
pub struct GroupConsumer {
    consumer: StreamConsumer,
    group_id: String,
}

impl GroupConsumer {
    /// The consumer group this handle belongs to.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Subscribe to `topics` and run the message loop until `shutdown` fires.
    ///
    /// Every message is decoded and handed to `handler`; the offset is
    /// committed after the handler returns, regardless of whether it failed.
    /// Handler and decode failures are logged and never block subsequent
    /// messages.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Subscription`] if the subscription cannot be
    /// established. Once the loop is running it only exits via `shutdown`.
    pub async fn run(
        &self,
        topics: &[&str],
        handler: &dyn EnvelopeHandler,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), BrokerError> {
        use futures::StreamExt;

        self.consumer
            .subscribe(topics)
            .map_err(|e| BrokerError::Subscription {
                topics: topics.iter().map(ToString::to_string).collect(),
                reason: e.to_string(),
            })?;

        tracing::info!(
            group = %self.group_id,
            ?topics,
            "Consumer subscribed"
        );

        let mut stream = self.consumer.stream();
        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(message)) => self.dispatch(&message, handler).await,
                    Some(Err(e)) => {
                        // Transport error: rdkafka reconnects underneath us.
                        tracing::error!(group = %self.group_id, error = %e, "Consumer transport error");
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!(group = %self.group_id, "Consumer shutdown signal received");
                        break;
                    }
                }
            }
        }

        tracing::info!(group = %self.group_id, "Consumer loop exited");
        Ok(())
    }

    /// Decode one message, hand it to the handler, and commit.
    ///
    /// The commit happens whether the handler succeeded or failed: a bad
    /// message must never wedge the partition behind it.
    async fn dispatch(
        &self,
        message: &rdkafka::message::BorrowedMessage<'_>,
        handler: &dyn EnvelopeHandler,
    ) {
        match message.payload() {
            None => {
                tracing::warn!(
                    group = %self.group_id,
                    topic = message.topic(),
                    offset = message.offset(),
                    "Message without payload, skipping"
                );
            }
            Some(bytes) => match EventEnvelope::from_json(bytes) {
                Err(e) => {
                    tracing::error!(
                        group = %self.group_id,
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Undecodable message, skipping"
                    );
                    metrics::counter!("consumer.undecodable", "group" => self.group_id.clone())
                        .increment(1);
                }
                Ok(envelope) => {
                    let event_type = envelope.event_type;
                    if let Err(e) = handler.handle(envelope).await {
                        tracing::error!(
                            group = %self.group_id,
                            topic = message.topic(),
                            partition = message.partition(),
                            offset = message.offset(),
                            event_type = %event_type,
                            error = %e,
                            "Handler failed; position advances anyway"
                        );
                        metrics::counter!(
                            "consumer.handler_failed",
                            "group" => self.group_id.clone()
                        )
                        .increment(1);
                    } else {
                        metrics::counter!("consumer.handled", "group" => self.group_id.clone())
                            .increment(1);
                    }
                }
            },
        }

        if let Err(e) = self.consumer.commit_message(message, CommitMode::Async) {
            tracing::warn!(
                group = %self.group_id,
                topic = message.topic(),
                offset = message.offset(),
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn event_broker_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<EventBroker>();
        assert_sync::<EventBroker>();
    }

    #[test]
    fn builder_requires_brokers() {
        let err = EventBroker::builder().build().unwrap_err();
        assert!(matches!(err, BrokerError::Configuration(_)));
    }

    #[test]
    fn builder_defaults() {
        let broker = EventBroker::builder().brokers("localhost:9092").build().unwrap();
        assert_eq!(broker.brokers(), "localhost:9092");
        assert_eq!(broker.timeout, Duration::from_secs(5));
        assert_eq!(broker.connect_attempts, 5);
        assert_eq!(broker.auto_offset_reset, "latest");
    }

    #[test]
    fn auth_codes_are_fatal_at_connect() {
        for code in [
            RDKafkaErrorCode::Authentication,
            RDKafkaErrorCode::SaslAuthenticationFailed,
            RDKafkaErrorCode::ClusterAuthorizationFailed,
        ] {
            assert_eq!(
                classify_connect_error(&KafkaError::MetadataFetch(code)),
                ConnectFailure::Fatal
            );
        }
    }

    #[test]
    fn transport_errors_are_transient_at_connect() {
        for code in [
            RDKafkaErrorCode::BrokerTransportFailure,
            RDKafkaErrorCode::AllBrokersDown,
            RDKafkaErrorCode::OperationTimedOut,
        ] {
            assert_eq!(
                classify_connect_error(&KafkaError::MetadataFetch(code)),
                ConnectFailure::Transient
            );
        }
    }

    #[test]
    fn config_errors_are_fatal_at_connect() {
        let err = KafkaError::ClientCreation("bad bootstrap".to_string());
        assert_eq!(classify_connect_error(&err), ConnectFailure::Fatal);
    }
}
