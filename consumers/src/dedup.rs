//! Per-group idempotency ledger.
//!
//! The pipeline is at-least-once at the outbox→broker hand-off, so every
//! projection sees occasional duplicate deliveries (relay crash between
//! publish and finalize, consumer crash between apply and commit). Counter
//! projections are not naturally idempotent: applying `quota.reserved` twice
//! double-counts. The ledger closes that gap by claiming one TTL-bound key
//! per `(group, eventId)` before the projection applies anything.

use std::time::Duration;
use surveyline_state::StateStore;
use uuid::Uuid;

/// Claims `dedup:{group}:{eventId}` keys so each event applies at most once
/// per consumer group within the ledger window.
#[derive(Clone)]
pub struct IdempotencyLedger {
    store: StateStore,
    group: String,
    ttl: Duration,
}

impl IdempotencyLedger {
    /// Create a ledger scoped to one consumer group.
    #[must_use]
    pub fn new(store: StateStore, group: impl Into<String>, ttl: Duration) -> Self {
        Self { store, group: group.into(), ttl }
    }

    /// Whether this is the first delivery of `event_id` to this group.
    ///
    /// Fails open: if the ledger itself is unreachable the event is treated
    /// as a first delivery, trading a possible duplicate apply for never
    /// stalling the projection on ledger availability.
    pub async fn first_delivery(&self, event_id: Uuid) -> bool {
        let key = format!("dedup:{}:{event_id}", self.group);
        match self.store.put_if_absent(&key, self.ttl).await {
            Ok(claimed) => {
                if !claimed {
                    tracing::debug!(group = %self.group, %event_id, "Duplicate delivery, skipping");
                    metrics::counter!("consumer.duplicates", "group" => self.group.clone())
                        .increment(1);
                }
                claimed
            }
            Err(e) => {
                tracing::warn!(
                    group = %self.group,
                    %event_id,
                    error = %e,
                    "Idempotency ledger unavailable, applying anyway"
                );
                true
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Requires a running Redis instance:
    //   docker run -d -p 6379:6379 redis:7-alpine

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn second_delivery_is_rejected() {
        let store = StateStore::new("redis://127.0.0.1:6379").await.unwrap();
        let ledger = IdempotencyLedger::new(store, "ledger-test-group", Duration::from_secs(60));
        let event_id = Uuid::new_v4();

        assert!(ledger.first_delivery(event_id).await);
        assert!(!ledger.first_delivery(event_id).await);
        assert!(ledger.first_delivery(Uuid::new_v4()).await);
    }
}
