//! Session lifecycle projection.
//!
//! Projects `runtime.sessions` into TTL-bound Redis records following the
//! state machine `(none) → started → {completed | terminated(reason)}`. A
//! live session is a [`SessionRecord`] plus an `active_session:{id}` index
//! entry; closing it replaces both with a longer-lived [`SessionMetrics`]
//! snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use surveyline_core::bus::{BusFuture, EnvelopeHandler, HandlerError};
use surveyline_core::envelope::EventEnvelope;
use surveyline_core::event::EventType;
use surveyline_core::payload::{
    self, SessionCompletedPayload, SessionStartedPayload, SessionTerminatedPayload,
};
use surveyline_state::{StateStore, StateStoreError};

use crate::dedup::IdempotencyLedger;

/// Where a session currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Respondent is answering.
    Started,
    /// Reached the end of the survey.
    Completed,
    /// Cut short before the end.
    Terminated,
}

/// Live-session record stored under `session:{id}` while a respondent is
/// answering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session identifier.
    pub session_id: String,
    /// Tenant the session belongs to.
    pub tenant_id: String,
    /// Survey the session runs against.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub survey_id: Option<String>,
    /// Collector the respondent entered through.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub collector_id: Option<String>,
    /// Lifecycle state, always `started` while this record exists.
    pub status: SessionStatus,
    /// Completion percentage, 0..=100.
    pub progress: u8,
    /// When the session started.
    pub started_at: DateTime<Utc>,
}

/// Closed-session snapshot stored under `session_metrics:{id}` after the
/// live record is deleted. Longer TTL than the record itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    /// Session identifier.
    pub session_id: String,
    /// Tenant the session belongs to.
    pub tenant_id: String,
    /// Survey the session ran against.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub survey_id: Option<String>,
    /// Terminal lifecycle state: `completed` or `terminated`.
    pub status: SessionStatus,
    /// Final completion percentage.
    pub progress: u8,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session closed.
    pub ended_at: DateTime<Utc>,
    /// Wall-clock session length in seconds, clamped to be non-negative
    /// (clock skew between producers must not yield negative durations).
    pub duration_secs: i64,
    /// Why the session was terminated, absent for completions.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub termination_reason: Option<String>,
}

/// Redis key layout for the session projection.
mod keys {
    pub fn record(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    pub fn active(session_id: &str) -> String {
        format!("active_session:{session_id}")
    }

    pub fn metrics(session_id: &str) -> String {
        format!("session_metrics:{session_id}")
    }

    pub fn stats(tenant_id: &str, counter: &str) -> String {
        format!("stats:{tenant_id}:{counter}")
    }
}

/// Fold a live record into its terminal snapshot.
///
/// A termination reason makes the outcome `terminated` and preserves the
/// in-flight progress; otherwise the session completed at 100%.
fn close_record(
    record: &SessionRecord,
    ended_at: DateTime<Utc>,
    termination_reason: Option<String>,
) -> SessionMetrics {
    let (status, progress) = match termination_reason {
        Some(_) => (SessionStatus::Terminated, record.progress),
        None => (SessionStatus::Completed, 100),
    };
    SessionMetrics {
        session_id: record.session_id.clone(),
        tenant_id: record.tenant_id.clone(),
        survey_id: record.survey_id.clone(),
        status,
        progress,
        started_at: record.started_at,
        ended_at,
        duration_secs: (ended_at - record.started_at).num_seconds().max(0),
        termination_reason,
    }
}

/// Applies session lifecycle events to the Redis projection.
pub struct SessionProjection {
    store: StateStore,
    ledger: IdempotencyLedger,
    /// TTL of the live record and the active index entry.
    record_ttl: Duration,
    /// TTL of the terminal snapshot. Longer than `record_ttl`.
    metrics_ttl: Duration,
    /// Window of the `stats:*` analytics counters.
    stats_window: Duration,
}

impl SessionProjection {
    /// Create the projection over a state store and its idempotency ledger.
    #[must_use]
    pub const fn new(
        store: StateStore,
        ledger: IdempotencyLedger,
        record_ttl: Duration,
        metrics_ttl: Duration,
        stats_window: Duration,
    ) -> Self {
        Self { store, ledger, record_ttl, metrics_ttl, stats_window }
    }

    async fn apply(&self, envelope: EventEnvelope) -> Result<(), HandlerError> {
        if !self.ledger.first_delivery(envelope.event_id).await {
            return Ok(());
        }

        match envelope.event_type {
            EventType::SessionStarted => self.on_started(&envelope).await,
            EventType::SessionCompleted => {
                let body: SessionCompletedPayload =
                    decode(envelope.event_type, &envelope.payload)?;
                let ended_at = body.completed_at.unwrap_or(envelope.occurred_at);
                self.on_closed(&envelope, ended_at, None).await
            }
            EventType::SessionTerminated => {
                let body: SessionTerminatedPayload =
                    decode(envelope.event_type, &envelope.payload)?;
                self.on_closed(&envelope, envelope.occurred_at, Some(body.reason)).await
            }
            other => {
                tracing::debug!(event_type = %other, "Not a session lifecycle event, skipping");
                Ok(())
            }
        }
    }

    async fn on_started(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let session_id = required_session_id(envelope)?;
        let body: SessionStartedPayload = decode(envelope.event_type, &envelope.payload)?;

        let record = SessionRecord {
            session_id: session_id.to_string(),
            tenant_id: envelope.tenant_id.clone(),
            survey_id: body.survey_id.or_else(|| envelope.survey_id.clone()),
            collector_id: body.collector_id,
            status: SessionStatus::Started,
            progress: 0,
            started_at: envelope.occurred_at,
        };

        self.store
            .put_json(&keys::record(session_id), &record, self.record_ttl)
            .await
            .map_err(store_err)?;
        self.store
            .put_marker(&keys::active(session_id), self.record_ttl)
            .await
            .map_err(store_err)?;
        self.bump_stat(&envelope.tenant_id, "sessions_started").await;

        tracing::info!(
            session_id,
            tenant_id = %envelope.tenant_id,
            survey_id = record.survey_id.as_deref().unwrap_or(""),
            "Session started"
        );
        Ok(())
    }

    async fn on_closed(
        &self,
        envelope: &EventEnvelope,
        ended_at: DateTime<Utc>,
        termination_reason: Option<String>,
    ) -> Result<(), HandlerError> {
        let session_id = required_session_id(envelope)?;

        let record: Option<SessionRecord> = self
            .store
            .get_json(&keys::record(session_id))
            .await
            .map_err(store_err)?;
        let Some(record) = record else {
            // Already closed, expired, or never seen. Safe to skip under
            // at-least-once delivery.
            tracing::warn!(
                session_id,
                event_type = %envelope.event_type,
                "No live record for session close, skipping"
            );
            return Ok(());
        };

        let snapshot = close_record(&record, ended_at, termination_reason);
        self.store
            .put_json(&keys::metrics(session_id), &snapshot, self.metrics_ttl)
            .await
            .map_err(store_err)?;
        self.store.delete(&keys::record(session_id)).await.map_err(store_err)?;
        self.store.delete(&keys::active(session_id)).await.map_err(store_err)?;
        if snapshot.status == SessionStatus::Completed {
            self.bump_stat(&envelope.tenant_id, "sessions_completed").await;
        }

        tracing::info!(
            session_id,
            status = ?snapshot.status,
            duration_secs = snapshot.duration_secs,
            reason = snapshot.termination_reason.as_deref().unwrap_or(""),
            "Session closed"
        );
        Ok(())
    }

    /// Windowed analytics counters are best-effort: a failed bump is logged
    /// and never fails the apply.
    async fn bump_stat(&self, tenant_id: &str, counter: &str) {
        let key = keys::stats(tenant_id, counter);
        if let Err(e) = self.store.window_increment(&key, self.stats_window).await {
            tracing::warn!(key = %key, error = %e, "Failed to bump analytics counter");
        }
    }
}

impl EnvelopeHandler for SessionProjection {
    fn handle(&self, envelope: EventEnvelope) -> BusFuture<'_, Result<(), HandlerError>> {
        Box::pin(self.apply(envelope))
    }
}

fn required_session_id(envelope: &EventEnvelope) -> Result<&str, HandlerError> {
    envelope
        .session_id
        .as_deref()
        .ok_or_else(|| HandlerError::MalformedPayload("missing sessionId".to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(
    event_type: EventType,
    body: &serde_json::Value,
) -> Result<T, HandlerError> {
    payload::decode(event_type.as_str(), body)
        .map_err(|e| HandlerError::MalformedPayload(e.to_string()))
}

fn store_err(e: StateStoreError) -> HandlerError {
    HandlerError::Store(e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use surveyline_core::envelope::WIRE_VERSION;
    use uuid::Uuid;

    fn live_record(started_at: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            session_id: "s1".to_string(),
            tenant_id: "t1".to_string(),
            survey_id: Some("sv1".to_string()),
            collector_id: None,
            status: SessionStatus::Started,
            progress: 40,
            started_at,
        }
    }

    #[test]
    fn completion_snaps_progress_to_full() {
        let started = Utc::now();
        let snapshot = close_record(&live_record(started), started + chrono::Duration::seconds(90), None);
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.progress, 100);
        assert_eq!(snapshot.duration_secs, 90);
        assert_eq!(snapshot.termination_reason, None);
    }

    #[test]
    fn termination_keeps_progress_and_reason() {
        let started = Utc::now();
        let snapshot = close_record(
            &live_record(started),
            started + chrono::Duration::seconds(10),
            Some("quota_full".to_string()),
        );
        assert_eq!(snapshot.status, SessionStatus::Terminated);
        assert_eq!(snapshot.progress, 40);
        assert_eq!(snapshot.termination_reason.as_deref(), Some("quota_full"));
    }

    #[test]
    fn skewed_clocks_never_yield_negative_durations() {
        let started = Utc::now();
        let snapshot = close_record(&live_record(started), started - chrono::Duration::seconds(5), None);
        assert_eq!(snapshot.duration_secs, 0);
    }

    #[test]
    fn key_layout() {
        assert_eq!(keys::record("s1"), "session:s1");
        assert_eq!(keys::active("s1"), "active_session:s1");
        assert_eq!(keys::metrics("s1"), "session_metrics:s1");
        assert_eq!(keys::stats("t1", "sessions_started"), "stats:t1:sessions_started");
    }

    // Full lifecycle tests against a running Redis instance:
    //   docker run -d -p 6379:6379 redis:7-alpine

    fn envelope(event_type: EventType, session_id: &str, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type,
            version: WIRE_VERSION,
            occurred_at: Utc::now(),
            tenant_id: "t1".to_string(),
            survey_id: Some("sv1".to_string()),
            session_id: Some(session_id.to_string()),
            payload,
        }
    }

    async fn projection() -> (SessionProjection, StateStore) {
        let store = StateStore::new("redis://127.0.0.1:6379").await.unwrap();
        let ledger = IdempotencyLedger::new(
            store.clone(),
            crate::SESSION_CONSUMER_GROUP,
            Duration::from_secs(60),
        );
        let projection = SessionProjection::new(
            store.clone(),
            ledger,
            Duration::from_secs(60),
            Duration::from_secs(300),
            Duration::from_secs(60),
        );
        (projection, store)
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn started_then_completed_lifecycle() {
        let (projection, store) = projection().await;
        let session_id = format!("lifecycle-{}", Uuid::new_v4());

        projection
            .apply(envelope(EventType::SessionStarted, &session_id, json!({"collectorId": "c1"})))
            .await
            .unwrap();
        let record: Option<SessionRecord> = store.get_json(&keys::record(&session_id)).await.unwrap();
        let record = record.unwrap();
        assert_eq!(record.status, SessionStatus::Started);
        assert_eq!(record.progress, 0);
        assert_eq!(record.collector_id.as_deref(), Some("c1"));
        assert!(store.exists(&keys::active(&session_id)).await.unwrap());

        projection
            .apply(envelope(EventType::SessionCompleted, &session_id, json!({})))
            .await
            .unwrap();
        let snapshot: Option<SessionMetrics> =
            store.get_json(&keys::metrics(&session_id)).await.unwrap();
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.progress, 100);
        assert!(!store.exists(&keys::record(&session_id)).await.unwrap());
        assert!(!store.exists(&keys::active(&session_id)).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn termination_records_the_reason() {
        let (projection, store) = projection().await;
        let session_id = format!("terminated-{}", Uuid::new_v4());

        projection
            .apply(envelope(EventType::SessionStarted, &session_id, json!({})))
            .await
            .unwrap();
        projection
            .apply(envelope(
                EventType::SessionTerminated,
                &session_id,
                json!({"reason": "screened_out"}),
            ))
            .await
            .unwrap();

        let snapshot: Option<SessionMetrics> =
            store.get_json(&keys::metrics(&session_id)).await.unwrap();
        let snapshot = snapshot.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Terminated);
        assert_eq!(snapshot.termination_reason.as_deref(), Some("screened_out"));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn close_without_a_live_record_is_skipped() {
        let (projection, store) = projection().await;
        let session_id = format!("ghost-{}", Uuid::new_v4());

        projection
            .apply(envelope(EventType::SessionCompleted, &session_id, json!({})))
            .await
            .unwrap();
        assert!(!store.exists(&keys::metrics(&session_id)).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn duplicate_start_applies_once() {
        let (projection, store) = projection().await;
        let session_id = format!("dup-{}", Uuid::new_v4());

        let event = envelope(EventType::SessionStarted, &session_id, json!({}));
        projection.apply(event.clone()).await.unwrap();
        store.delete(&keys::record(&session_id)).await.unwrap();

        // Redelivery of the same event id is absorbed by the ledger.
        projection.apply(event).await.unwrap();
        assert!(!store.exists(&keys::record(&session_id)).await.unwrap());
    }
}
