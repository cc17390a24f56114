//! Static event-type → (topic, partition-key field) routing.
//!
//! The table is an exhaustive `match` over [`EventType`], so adding an event
//! type without a routing entry fails at compile time rather than at runtime.
//! Key derivation is deterministic and always non-empty: `payload[key_field]`
//! if present, else the fact's session id, else the fact's own id. That way
//! all messages about one logical entity land in the same partition and are
//! delivered in order relative to each other.

use crate::event::EventType;
use serde_json::Value;

/// The fixed topic catalogue. Extend the pipeline via [`route`] only.
pub mod topics {
    /// Session lifecycle facts.
    pub const RUNTIME_SESSIONS: &str = "runtime.sessions";
    /// Answer submission facts.
    pub const RUNTIME_ANSWERS: &str = "runtime.answers";
    /// Quota reservation protocol facts.
    pub const RUNTIME_QUOTA: &str = "runtime.quota";
    /// Collector lifecycle facts.
    pub const COLLECTORS_EVENTS: &str = "collectors.events";
    /// Facts that exhausted all publish attempts, preserved for inspection.
    pub const DEAD_LETTER: &str = "runtime.dlq";
}

/// Where an event type is published and which payload field keys its
/// partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// Destination topic.
    pub topic: &'static str,
    /// Payload field consulted first when deriving the partition key.
    pub key_field: &'static str,
}

/// Look up the route for an event type.
#[must_use]
pub const fn route(event_type: EventType) -> Route {
    match event_type {
        EventType::SessionStarted | EventType::SessionCompleted | EventType::SessionTerminated => {
            Route { topic: topics::RUNTIME_SESSIONS, key_field: "sessionId" }
        }
        EventType::AnswerSubmitted => {
            Route { topic: topics::RUNTIME_ANSWERS, key_field: "sessionId" }
        }
        EventType::QuotaReserved | EventType::QuotaReleased | EventType::QuotaFinalized => {
            Route { topic: topics::RUNTIME_QUOTA, key_field: "bucketId" }
        }
        EventType::CollectorOpened | EventType::CollectorClosed => {
            Route { topic: topics::COLLECTORS_EVENTS, key_field: "collectorId" }
        }
    }
}

/// Derive the partition key for a fact.
///
/// Resolution order: `payload[key_field]` when it is a non-empty string, else
/// the fact's session id, else the fact's own id. The fallback to the fact id
/// guarantees the key is never empty.
#[must_use]
pub fn partition_key(
    route: &Route,
    payload: &Value,
    session_id: Option<&str>,
    event_id: &str,
) -> String {
    let payload_key = payload
        .get(route.key_field)
        .and_then(Value::as_str)
        .filter(|key| !key.is_empty());
    if let Some(key) = payload_key {
        return key.to_string();
    }
    if let Some(session) = session_id.filter(|session| !session.is_empty()) {
        return session.to_string();
    }
    event_id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_events_share_the_sessions_topic() {
        for event_type in [
            EventType::SessionStarted,
            EventType::SessionCompleted,
            EventType::SessionTerminated,
        ] {
            let r = route(event_type);
            assert_eq!(r.topic, topics::RUNTIME_SESSIONS);
            assert_eq!(r.key_field, "sessionId");
        }
    }

    #[test]
    fn quota_events_are_keyed_by_bucket() {
        for event_type in [
            EventType::QuotaReserved,
            EventType::QuotaReleased,
            EventType::QuotaFinalized,
        ] {
            let r = route(event_type);
            assert_eq!(r.topic, topics::RUNTIME_QUOTA);
            assert_eq!(r.key_field, "bucketId");
        }
    }

    #[test]
    fn remaining_catalogue_entries_are_mapped() {
        assert_eq!(route(EventType::AnswerSubmitted).topic, topics::RUNTIME_ANSWERS);
        assert_eq!(route(EventType::CollectorOpened).topic, topics::COLLECTORS_EVENTS);
        assert_eq!(route(EventType::CollectorClosed).key_field, "collectorId");
    }

    #[test]
    fn payload_field_wins_key_derivation() {
        let r = route(EventType::QuotaReserved);
        let key = partition_key(&r, &json!({"bucketId": "b1"}), Some("s1"), "e1");
        assert_eq!(key, "b1");
    }

    #[test]
    fn session_id_is_the_first_fallback() {
        let r = route(EventType::SessionStarted);
        let key = partition_key(&r, &json!({}), Some("s1"), "e1");
        assert_eq!(key, "s1");
    }

    #[test]
    fn event_id_is_the_last_resort() {
        let r = route(EventType::CollectorOpened);
        let key = partition_key(&r, &json!({}), None, "e1");
        assert_eq!(key, "e1");
    }

    #[test]
    fn empty_strings_never_become_keys() {
        let r = route(EventType::QuotaReserved);
        let key = partition_key(&r, &json!({"bucketId": ""}), Some(""), "e1");
        assert_eq!(key, "e1");
    }

    #[test]
    fn non_string_payload_key_falls_through() {
        let r = route(EventType::QuotaReserved);
        let key = partition_key(&r, &json!({"bucketId": 42}), Some("s1"), "e1");
        assert_eq!(key, "s1");
    }

    #[test]
    fn derivation_is_deterministic() {
        let r = route(EventType::SessionStarted);
        let payload = json!({"sessionId": "s9"});
        let first = partition_key(&r, &payload, None, "e1");
        let second = partition_key(&r, &payload, None, "e1");
        assert_eq!(first, second);
        assert_eq!(first, "s9");
    }
}
