//! Typed per-event payload records.
//!
//! Envelope payloads travel as opaque JSON, but consumers never poke at raw
//! fields optimistically: each event type they apply has a typed record here,
//! decoded fail-closed via [`decode`]. A schema mismatch is rejected (logged
//! and skipped by the consumer) instead of silently projecting garbage.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Raised when a payload does not match the schema for its event type.
#[derive(Debug, Error)]
#[error("malformed {event_type} payload: {reason}")]
pub struct PayloadError {
    /// The dotted event-type tag the payload claimed to be.
    pub event_type: &'static str,
    /// What the decoder rejected.
    pub reason: String,
}

/// Decode a payload into its typed record, fail-closed.
///
/// # Errors
///
/// Returns [`PayloadError`] when the payload does not match the record schema
/// (missing required fields, wrong types).
pub fn decode<T: DeserializeOwned>(event_type: &'static str, payload: &Value) -> Result<T, PayloadError> {
    serde_json::from_value(payload.clone()).map_err(|e| PayloadError {
        event_type,
        reason: e.to_string(),
    })
}

/// Body of `session.started`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartedPayload {
    /// Survey the session runs against, when not already on the envelope.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub survey_id: Option<String>,
    /// Collector the respondent entered through.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub collector_id: Option<String>,
}

/// Body of `session.completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SessionCompletedPayload {
    /// Completion instant when the producer recorded one; the envelope's
    /// `occurredAt` is used otherwise.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Body of `session.terminated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTerminatedPayload {
    /// Why the session was cut short (e.g. `screened_out`, `quota_full`).
    pub reason: String,
}

/// Body of the three `quota.*` reservation-protocol events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaPayload {
    /// The capacity bucket the reservation targets.
    pub bucket_id: String,
    /// The session holding the reservation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
}
