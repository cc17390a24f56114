//! Outbox relay for the Surveyline pipeline.
//!
//! Business transactions write their facts into the `outbox_events` table in
//! the same database transaction as the business mutation itself, so "the
//! fact happened" and "the fact will be published" commit together. The relay
//! is the only component that reads, mutates, and finalizes those rows: it
//! polls for pending rows, routes and publishes them, tracks attempts, and
//! retries with exponential backoff until a row either publishes or is
//! dead-lettered.
//!
//! ```text
//! business tx ──▶ outbox row ──▶ OutboxRelay ──▶ router ──▶ broker topic
//!                                    │
//!                                    └─ exhausted ──▶ runtime.dlq
//! ```
//!
//! See [`relay::OutboxRelay`] for the loop contract and the single-instance
//! constraint.

pub mod config;
pub mod outbox;
pub mod relay;

pub use config::Config;
pub use outbox::{OutboxEvent, OutboxMetrics, OutboxStore};
pub use relay::{DeadLetterRecord, OutboxRelay, RelayConfig, RelayError};
