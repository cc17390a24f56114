//! The canonical versioned wire record for a domain fact.
//!
//! An [`EventEnvelope`] is constructed fresh per publish from an outbox row and
//! is never persisted independently. The body is JSON (camelCase field names);
//! the broker additionally attaches [`MessageHeaders`] so consumers can filter
//! and route without deserializing the body.

use crate::event::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Current envelope schema version, carried in the body and the headers.
pub const WIRE_VERSION: u16 = 1;

/// Message header names attached to every published record.
pub mod header {
    /// Header carrying the dotted event-type tag.
    pub const EVENT_TYPE: &str = "eventType";
    /// Header carrying the tenant the fact belongs to.
    pub const TENANT_ID: &str = "tenantId";
    /// Header carrying the envelope schema version.
    pub const VERSION: &str = "version";
}

/// Error types for envelope wire encoding.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Failed to serialize an envelope to JSON.
    #[error("failed to serialize envelope: {0}")]
    Serialization(String),

    /// Failed to parse an envelope from JSON.
    #[error("failed to parse envelope: {0}")]
    Deserialization(String),
}

/// The canonical versioned wrapper placed around a domain fact for wire
/// transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    /// Stable fact identifier (the outbox row id, so retries and consumer
    /// deduplication see the same id).
    pub event_id: Uuid,
    /// The fact tag.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Envelope schema version.
    pub version: u16,
    /// When the business fact happened (producer clock).
    pub occurred_at: DateTime<Utc>,
    /// Tenant the fact belongs to.
    pub tenant_id: String,
    /// Survey the fact relates to, when applicable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub survey_id: Option<String>,
    /// Session the fact relates to, when applicable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    /// Opaque event-type-specific body.
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Serialize the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Serialization`] if the payload cannot be
    /// rendered as JSON (only possible for non-string map keys, which the
    /// pipeline never produces).
    pub fn to_json(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Serialization(e.to_string()))
    }

    /// Parse an envelope from its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Deserialization`] on malformed JSON or an
    /// unknown event-type tag.
    pub fn from_json(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Deserialization(e.to_string()))
    }

    /// The message headers for this envelope.
    #[must_use]
    pub fn headers(&self) -> MessageHeaders {
        MessageHeaders {
            event_type: self.event_type.as_str().to_string(),
            tenant_id: self.tenant_id.clone(),
            version: self.version.to_string(),
        }
    }
}

/// Headers attached to every published message so consumers can filter and
/// route without touching the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeaders {
    /// Dotted event-type tag (header name `eventType`).
    pub event_type: String,
    /// Tenant id (header name `tenantId`).
    pub tenant_id: String,
    /// Envelope schema version (header name `version`).
    pub version: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> EventEnvelope {
        EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type: EventType::SessionStarted,
            version: WIRE_VERSION,
            occurred_at: Utc::now(),
            tenant_id: "t1".to_string(),
            survey_id: Some("sv1".to_string()),
            session_id: Some("s1".to_string()),
            payload: json!({"collectorId": "c1"}),
        }
    }

    #[test]
    fn json_roundtrip_preserves_identity_fields() {
        let envelope = sample();
        let bytes = envelope.to_json().unwrap();
        let parsed = EventEnvelope::from_json(&bytes).unwrap();

        assert_eq!(parsed.event_type, envelope.event_type);
        assert_eq!(parsed.tenant_id, envelope.tenant_id);
        assert_eq!(parsed.survey_id, envelope.survey_id);
        assert_eq!(parsed.session_id, envelope.session_id);
        assert_eq!(parsed.payload, envelope.payload);
        assert_eq!(parsed, envelope);
    }

    #[test]
    fn wire_form_uses_camel_case_names() {
        let envelope = sample();
        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();

        assert!(value.get("eventId").is_some());
        assert_eq!(value["type"], "session.started");
        assert!(value.get("occurredAt").is_some());
        assert_eq!(value["tenantId"], "t1");
        assert_eq!(value["surveyId"], "sv1");
        assert_eq!(value["sessionId"], "s1");
    }

    #[test]
    fn absent_optional_ids_are_omitted_from_the_wire() {
        let mut envelope = sample();
        envelope.survey_id = None;
        envelope.session_id = None;

        let value: serde_json::Value =
            serde_json::from_slice(&envelope.to_json().unwrap()).unwrap();
        assert!(value.get("surveyId").is_none());
        assert!(value.get("sessionId").is_none());

        let parsed = EventEnvelope::from_json(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(parsed.survey_id, None);
        assert_eq!(parsed.session_id, None);
    }

    #[test]
    fn headers_carry_type_tenant_and_version() {
        let headers = sample().headers();
        assert_eq!(headers.event_type, "session.started");
        assert_eq!(headers.tenant_id, "t1");
        assert_eq!(headers.version, "1");
    }

    #[test]
    fn unknown_type_tag_fails_to_parse() {
        let body = json!({
            "eventId": Uuid::new_v4(),
            "type": "foo.bar",
            "version": 1,
            "occurredAt": Utc::now(),
            "tenantId": "t1",
            "payload": {}
        });
        let err = EventEnvelope::from_json(body.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, EnvelopeError::Deserialization(_)));
    }
}
