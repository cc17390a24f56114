//! Redis state-store client for Surveyline projections.
//!
//! Everything written through this crate is a derived, non-authoritative
//! projection: TTL-bound session records and caches, atomic hash counters for
//! quota buckets, and windowed counters for analytics. All of it must be
//! reconstructable by replaying the event log and is never the single source
//! of truth for admission or billing decisions.
//!
//! # Key namespaces
//!
//! - `session:{id}`, `active_session:{id}`, `session_metrics:{id}`: TTL-bound
//!   session projection records.
//! - `quota:{bucketId}`: hash counters `reserved`/`filled`; not TTL-bound,
//!   they persist until explicitly mutated.
//! - `quota:{bucketId}:session:{sessionId}`: TTL-bound reservation markers.
//! - `dedup:{group}:{eventId}`: TTL-bound idempotency ledger entries.
//! - `stats:*`: windowed analytics counters.
//!
//! # Example
//!
//! ```no_run
//! use surveyline_state::StateStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = StateStore::new("redis://127.0.0.1:6379").await?;
//! let reserved = store.hash_increment("quota:b1", "reserved", 1).await?;
//! # Ok(())
//! # }
//! ```

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Error types for state-store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// Could not reach or open the Redis connection.
    #[error("state store connection failed: {0}")]
    Connection(String),

    /// A command failed against a live connection.
    #[error("state store command failed: {0}")]
    Command(String),

    /// A stored record could not be encoded or decoded.
    #[error("state store serialization failed: {0}")]
    Serialization(String),
}

/// Redis-backed key/value store for TTL-bound caches, atomic counters, and
/// session projection records.
///
/// Cheap to clone: connection pooling is handled by [`ConnectionManager`].
#[derive(Clone)]
pub struct StateStore {
    conn: ConnectionManager,
}

#[allow(clippy::cast_possible_truncation)] // TTLs are small durations, seconds fit in u64/i64
impl StateStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Connection`] if the URL is invalid or the
    /// server is unreachable.
    pub async fn new(redis_url: &str) -> Result<Self, StateStoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StateStoreError::Connection(format!("failed to create client: {e}")))?;
        let conn = ConnectionManager::new(client).await.map_err(|e| {
            StateStoreError::Connection(format!("failed to create connection manager: {e}"))
        })?;
        // URL deliberately not logged, it may embed credentials.
        tracing::info!("State store connected");
        Ok(Self { conn })
    }

    /// Store a JSON-serialized record under `key` with a TTL.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Serialization`] if the record cannot be
    /// encoded, or [`StateStoreError::Command`] on a Redis failure.
    pub async fn put_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(value)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;
        let _: () = conn
            .set_ex(key, body, ttl.as_secs())
            .await
            .map_err(|e| StateStoreError::Command(format!("SET {key}: {e}")))?;
        Ok(())
    }

    /// Read and decode a JSON record. `None` means the key does not exist
    /// (or its TTL expired).
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Serialization`] if the stored value does
    /// not decode, or [`StateStoreError::Command`] on a Redis failure.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StateStoreError> {
        let mut conn = self.conn.clone();
        let body: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StateStoreError::Command(format!("GET {key}: {e}")))?;
        match body {
            None => Ok(None),
            Some(body) => serde_json::from_str(&body)
                .map(Some)
                .map_err(|e| StateStoreError::Serialization(e.to_string())),
        }
    }

    /// Store a bare TTL-bound marker key (index entries, reservation markers).
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Command`] on a Redis failure.
    pub async fn put_marker(&self, key: &str, ttl: Duration) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, 1u8, ttl.as_secs())
            .await
            .map_err(|e| StateStoreError::Command(format!("SET {key}: {e}")))?;
        Ok(())
    }

    /// Claim `key` if nobody holds it yet (`SET NX EX`, one round trip).
    ///
    /// Returns `true` when this call created the key. This is the
    /// idempotency-ledger primitive: the first delivery of an event claims
    /// its key, duplicates see `false`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Command`] on a Redis failure.
    pub async fn put_if_absent(&self, key: &str, ttl: Duration) -> Result<bool, StateStoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(1u8)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(format!("SET NX {key}: {e}")))?;
        Ok(reply.is_some())
    }

    /// Delete a key. Deleting an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Command`] on a Redis failure.
    pub async fn delete(&self, key: &str) -> Result<(), StateStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| StateStoreError::Command(format!("DEL {key}: {e}")))?;
        Ok(())
    }

    /// Whether a key currently exists.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Command`] on a Redis failure.
    pub async fn exists(&self, key: &str) -> Result<bool, StateStoreError> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| StateStoreError::Command(format!("EXISTS {key}: {e}")))
    }

    /// Atomically add `delta` to a named hash field and return the new value
    /// (`HINCRBY`, single round trip).
    ///
    /// Quota counter hashes are deliberately not TTL-bound: they persist
    /// until explicitly mutated.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Command`] on a Redis failure.
    pub async fn hash_increment(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> Result<i64, StateStoreError> {
        let mut conn = self.conn.clone();
        conn.hincr(key, field, delta)
            .await
            .map_err(|e| StateStoreError::Command(format!("HINCRBY {key} {field}: {e}")))
    }

    /// Read all counter fields of a hash. Absent hashes read as empty.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Command`] on a Redis failure.
    pub async fn hash_counters(&self, key: &str) -> Result<HashMap<String, i64>, StateStoreError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key)
            .await
            .map_err(|e| StateStoreError::Command(format!("HGETALL {key}: {e}")))
    }

    /// Bump a windowed analytics counter: atomic `INCR` + `EXPIRE` in one
    /// pipeline, returning the new count.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Command`] on a Redis failure.
    pub async fn window_increment(&self, key: &str, ttl: Duration) -> Result<i64, StateStoreError> {
        let mut conn = self.conn.clone();
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1i64)
            .expire(key, ttl.as_secs() as i64)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::Command(format!("INCR {key}: {e}")))?;
        Ok(count)
    }
}
