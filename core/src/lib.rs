//! Core types for the Surveyline event pipeline.
//!
//! This crate defines the vocabulary shared by the outbox relay, the broker
//! client, and the projection consumers:
//!
//! - [`event::EventType`]: the closed set of domain fact tags the pipeline
//!   carries. Adding a variant without a routing entry is a compile error.
//! - [`envelope::EventEnvelope`]: the canonical versioned JSON wire record
//!   built fresh for every publish.
//! - [`router`]: the static event-type → (topic, partition-key field) table
//!   and the deterministic partition-key derivation.
//! - [`payload`]: typed per-event payload records, decoded fail-closed at
//!   consumer boundaries instead of poking at raw JSON.
//! - [`bus`]: the [`bus::EventPublisher`] and [`bus::EnvelopeHandler`] seams
//!   implemented by the broker crate and the projection consumers.
//!
//! # Ordering model
//!
//! Every published message carries a deterministic, non-empty partition key so
//! that all facts about one logical entity (session, quota bucket, collector)
//! land in the same partition and are delivered in order relative to each
//! other. There is no cross-partition ordering guarantee.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod payload;
pub mod router;

pub use bus::{EnvelopeHandler, EventPublisher, HandlerError, PublishError};
pub use envelope::{EventEnvelope, MessageHeaders};
pub use event::{EventType, UnknownEventType};
pub use router::{Route, partition_key, route, topics};
