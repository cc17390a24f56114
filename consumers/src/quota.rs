//! Quota reservation projection.
//!
//! Projects `runtime.quota` into per-bucket hash counters implementing the
//! two-phase admission protocol: a session first reserves a slot
//! (`reserved += 1`), then either abandons it (`released`, `reserved -= 1`)
//! or converts it into a completed interview (`finalized`, `reserved -= 1`,
//! `filled += 1`). A TTL-bound marker `quota:{bucketId}:session:{sessionId}`
//! tracks which session holds each reservation.
//!
//! The counters are a non-authoritative projection; admission decisions
//! replay against the log, not against these hashes.

use std::time::Duration;
use surveyline_core::bus::{BusFuture, EnvelopeHandler, HandlerError};
use surveyline_core::envelope::EventEnvelope;
use surveyline_core::event::EventType;
use surveyline_core::payload::{self, QuotaPayload};
use surveyline_state::{StateStore, StateStoreError};

use crate::dedup::IdempotencyLedger;

/// Hash field for slots held by in-flight sessions.
pub const RESERVED: &str = "reserved";

/// Hash field for slots converted into completed interviews.
pub const FILLED: &str = "filled";

mod keys {
    pub fn bucket(bucket_id: &str) -> String {
        format!("quota:{bucket_id}")
    }

    pub fn reservation(bucket_id: &str, session_id: &str) -> String {
        format!("quota:{bucket_id}:session:{session_id}")
    }
}

/// Applies quota reservation events to the Redis counters.
pub struct QuotaProjection {
    store: StateStore,
    ledger: IdempotencyLedger,
    /// TTL of the per-session reservation markers.
    marker_ttl: Duration,
}

impl QuotaProjection {
    /// Create the projection over a state store and its idempotency ledger.
    #[must_use]
    pub const fn new(store: StateStore, ledger: IdempotencyLedger, marker_ttl: Duration) -> Self {
        Self { store, ledger, marker_ttl }
    }

    async fn apply(&self, envelope: EventEnvelope) -> Result<(), HandlerError> {
        let (reserved_delta, filled_delta) = match envelope.event_type {
            EventType::QuotaReserved => (1, 0),
            EventType::QuotaReleased => (-1, 0),
            EventType::QuotaFinalized => (-1, 1),
            other => {
                tracing::debug!(event_type = %other, "Not a quota event, skipping");
                return Ok(());
            }
        };

        if !self.ledger.first_delivery(envelope.event_id).await {
            return Ok(());
        }

        let body: QuotaPayload = payload::decode(envelope.event_type.as_str(), &envelope.payload)
            .map_err(|e| HandlerError::MalformedPayload(e.to_string()))?;
        let session_id = body.session_id.or_else(|| envelope.session_id.clone());

        let bucket = keys::bucket(&body.bucket_id);
        let reserved = self
            .store
            .hash_increment(&bucket, RESERVED, reserved_delta)
            .await
            .map_err(store_err)?;
        if filled_delta != 0 {
            self.store
                .hash_increment(&bucket, FILLED, filled_delta)
                .await
                .map_err(store_err)?;
        }
        if reserved < 0 {
            // Released/finalized without a matching reserve in the ledger
            // window. The counter is reconciled from the log, not here.
            tracing::warn!(
                bucket_id = %body.bucket_id,
                reserved,
                "Reserved counter went negative"
            );
        }

        if let Some(session_id) = session_id {
            let marker = keys::reservation(&body.bucket_id, &session_id);
            let result = match envelope.event_type {
                EventType::QuotaReserved => self.store.put_marker(&marker, self.marker_ttl).await,
                _ => self.store.delete(&marker).await,
            };
            result.map_err(store_err)?;
        }

        tracing::info!(
            event_type = %envelope.event_type,
            bucket_id = %body.bucket_id,
            reserved,
            "Quota counters updated"
        );
        Ok(())
    }
}

impl EnvelopeHandler for QuotaProjection {
    fn handle(&self, envelope: EventEnvelope) -> BusFuture<'_, Result<(), HandlerError>> {
        Box::pin(self.apply(envelope))
    }
}

fn store_err(e: StateStoreError) -> HandlerError {
    HandlerError::Store(e.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use surveyline_core::envelope::WIRE_VERSION;
    use uuid::Uuid;

    #[test]
    fn key_layout() {
        assert_eq!(keys::bucket("b1"), "quota:b1");
        assert_eq!(keys::reservation("b1", "s1"), "quota:b1:session:s1");
    }

    // Counter tests against a running Redis instance:
    //   docker run -d -p 6379:6379 redis:7-alpine

    fn envelope(event_type: EventType, bucket_id: &str, session_id: &str) -> EventEnvelope {
        EventEnvelope {
            event_id: Uuid::new_v4(),
            event_type,
            version: WIRE_VERSION,
            occurred_at: Utc::now(),
            tenant_id: "t1".to_string(),
            survey_id: Some("sv1".to_string()),
            session_id: Some(session_id.to_string()),
            payload: json!({"bucketId": bucket_id, "sessionId": session_id}),
        }
    }

    async fn projection() -> (QuotaProjection, StateStore) {
        let store = StateStore::new("redis://127.0.0.1:6379").await.unwrap();
        let ledger = IdempotencyLedger::new(
            store.clone(),
            crate::QUOTA_CONSUMER_GROUP,
            Duration::from_secs(60),
        );
        let projection = QuotaProjection::new(store.clone(), ledger, Duration::from_secs(60));
        (projection, store)
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn reserve_then_finalize_moves_the_slot() {
        let (projection, store) = projection().await;
        let bucket_id = format!("finalize-{}", Uuid::new_v4());

        projection
            .apply(envelope(EventType::QuotaReserved, &bucket_id, "s1"))
            .await
            .unwrap();
        let counters = store.hash_counters(&keys::bucket(&bucket_id)).await.unwrap();
        assert_eq!(counters.get(RESERVED), Some(&1));
        assert!(store.exists(&keys::reservation(&bucket_id, "s1")).await.unwrap());

        projection
            .apply(envelope(EventType::QuotaFinalized, &bucket_id, "s1"))
            .await
            .unwrap();
        let counters = store.hash_counters(&keys::bucket(&bucket_id)).await.unwrap();
        assert_eq!(counters.get(RESERVED), Some(&0));
        assert_eq!(counters.get(FILLED), Some(&1));
        assert!(!store.exists(&keys::reservation(&bucket_id, "s1")).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn reserve_then_release_returns_the_slot() {
        let (projection, store) = projection().await;
        let bucket_id = format!("release-{}", Uuid::new_v4());

        projection
            .apply(envelope(EventType::QuotaReserved, &bucket_id, "s1"))
            .await
            .unwrap();
        projection
            .apply(envelope(EventType::QuotaReleased, &bucket_id, "s1"))
            .await
            .unwrap();

        let counters = store.hash_counters(&keys::bucket(&bucket_id)).await.unwrap();
        assert_eq!(counters.get(RESERVED), Some(&0));
        assert_eq!(counters.get(FILLED), None);
        assert!(!store.exists(&keys::reservation(&bucket_id, "s1")).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn duplicate_reserve_counts_once() {
        let (projection, store) = projection().await;
        let bucket_id = format!("dup-{}", Uuid::new_v4());

        let event = envelope(EventType::QuotaReserved, &bucket_id, "s1");
        projection.apply(event.clone()).await.unwrap();
        projection.apply(event).await.unwrap();

        let counters = store.hash_counters(&keys::bucket(&bucket_id)).await.unwrap();
        assert_eq!(counters.get(RESERVED), Some(&1));
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn malformed_quota_payload_is_rejected() {
        let (projection, _) = projection().await;
        let mut event = envelope(EventType::QuotaReserved, "b1", "s1");
        event.payload = json!({"sessionId": "s1"});

        let err = projection.apply(event).await.unwrap_err();
        assert!(matches!(err, HandlerError::MalformedPayload(_)));
    }
}
