//! Projection consumers for the Surveyline pipeline.
//!
//! Each logical consumer is a separate binary bound to its own consumer
//! group, so it scales and restarts independently of the others:
//!
//! - [`session::SessionProjection`] (`session-consumer-group`) projects the
//!   session lifecycle from `runtime.sessions` into TTL-bound Redis records.
//! - [`quota::QuotaProjection`] (`quota-consumer-group`) projects the
//!   two-phase quota reservation protocol from `runtime.quota` into atomic
//!   hash counters.
//!
//! Everything projected here is derived state: rebuildable by replaying the
//! topics, never the source of truth for admission or billing. Handler
//! failures are logged and the delivery position advances anyway, so every
//! apply must be safe to skip. Duplicate deliveries are absorbed by the
//! [`dedup::IdempotencyLedger`].

pub mod config;
pub mod dedup;
pub mod quota;
pub mod session;

pub use config::Config;

/// Default consumer group for the session projection. Overridable through
/// `SESSION_CONSUMER_GROUP` in the binary's [`Config`].
pub const SESSION_CONSUMER_GROUP: &str = "session-consumer-group";

/// Default consumer group for the quota projection. Overridable through
/// `QUOTA_CONSUMER_GROUP` in the binary's [`Config`].
pub const QUOTA_CONSUMER_GROUP: &str = "quota-consumer-group";
