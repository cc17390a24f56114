//! Publisher and handler seams between the pipeline tiers.
//!
//! [`EventPublisher`] is implemented by the broker crate and faked in-memory
//! by relay tests; [`EnvelopeHandler`] is implemented by the projection
//! consumers and driven by the broker's consumer-group message loop. Both are
//! object-safe and use boxed futures so trait objects can cross crate
//! boundaries without pulling an async-trait dependency.

use crate::envelope::{EventEnvelope, MessageHeaders};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by the object-safe async seams.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Error types for publish operations.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker could not be reached. Transient: the relay retries these
    /// with exponential backoff, bounded by its max-attempts budget.
    #[error("broker unreachable: {0}")]
    Connection(String),

    /// The broker rejected or timed out a specific record.
    #[error("failed to publish to {topic}: {reason}")]
    Publish {
        /// Destination topic of the failed record.
        topic: String,
        /// Broker-reported reason.
        reason: String,
    },

    /// The envelope could not be rendered to its wire form.
    #[error("failed to serialize envelope: {0}")]
    Serialization(String),
}

/// Publishes envelopes to broker topics with a deterministic partition key.
pub trait EventPublisher: Send + Sync {
    /// Publish an envelope to `topic` under partition key `key`, attaching the
    /// envelope's headers.
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        envelope: &'a EventEnvelope,
    ) -> BusFuture<'a, Result<(), PublishError>>;

    /// Publish a pre-serialized body with explicit headers.
    ///
    /// Used for dead-letter records, whose original event type may not parse
    /// into the closed catalogue and therefore cannot be wrapped in an
    /// [`EventEnvelope`].
    fn publish_raw<'a>(
        &'a self,
        topic: &'a str,
        key: &'a str,
        body: Vec<u8>,
        headers: MessageHeaders,
    ) -> BusFuture<'a, Result<(), PublishError>>;
}

/// Error types a projection handler can surface.
///
/// Handler failures are logged by the message loop and the delivery position
/// still advances; there is no retry or backpressure at the consumer tier, so
/// projection logic must be safe to skip or to later reconcile.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload did not match the schema for its event type.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// The projection state store rejected a mutation.
    #[error("projection store failure: {0}")]
    Store(String),
}

/// Applies one inbound envelope to a projection.
pub trait EnvelopeHandler: Send + Sync {
    /// Handle a single envelope. Called for message N+1 only after the call
    /// for message N returned, which preserves per-partition ordering.
    fn handle(&self, envelope: EventEnvelope) -> BusFuture<'_, Result<(), HandlerError>>;
}
