//! Configuration for the consumer binaries.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Consumer configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Redis connection URL
    pub redis_url: String,
    /// Consumer group of the session projection
    pub session_group: String,
    /// Consumer group of the quota projection
    pub quota_group: String,
    /// Projection TTLs
    pub ttl: TtlConfig,
}

/// TTLs of the projected records, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Live session record and active index entry (default: 4 hours)
    pub session_record_secs: u64,
    /// Closed-session metrics snapshot (default: 7 days)
    pub session_metrics_secs: u64,
    /// Windowed analytics counters (default: 1 hour)
    pub stats_window_secs: u64,
    /// Quota reservation markers (default: 4 hours)
    pub quota_marker_secs: u64,
    /// Idempotency ledger entries (default: 24 hours)
    pub dedup_secs: u64,
}

impl Config {
    /// Load configuration from environment variables. Unset or unparseable
    /// variables fall back to local-development defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "localhost:9092".to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            session_group: env::var("SESSION_CONSUMER_GROUP")
                .unwrap_or_else(|_| crate::SESSION_CONSUMER_GROUP.to_string()),
            quota_group: env::var("QUOTA_CONSUMER_GROUP")
                .unwrap_or_else(|_| crate::QUOTA_CONSUMER_GROUP.to_string()),
            ttl: TtlConfig {
                session_record_secs: env::var("SESSION_RECORD_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(14_400),
                session_metrics_secs: env::var("SESSION_METRICS_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(604_800),
                stats_window_secs: env::var("STATS_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3600),
                quota_marker_secs: env::var("QUOTA_MARKER_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(14_400),
                dedup_secs: env::var("DEDUP_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(86_400),
            },
        }
    }
}

impl TtlConfig {
    /// Live session record TTL as a [`Duration`].
    #[must_use]
    pub const fn session_record(&self) -> Duration {
        Duration::from_secs(self.session_record_secs)
    }

    /// Metrics snapshot TTL as a [`Duration`].
    #[must_use]
    pub const fn session_metrics(&self) -> Duration {
        Duration::from_secs(self.session_metrics_secs)
    }

    /// Analytics window as a [`Duration`].
    #[must_use]
    pub const fn stats_window(&self) -> Duration {
        Duration::from_secs(self.stats_window_secs)
    }

    /// Reservation marker TTL as a [`Duration`].
    #[must_use]
    pub const fn quota_marker(&self) -> Duration {
        Duration::from_secs(self.quota_marker_secs)
    }

    /// Idempotency ledger TTL as a [`Duration`].
    #[must_use]
    pub const fn dedup(&self) -> Duration {
        Duration::from_secs(self.dedup_secs)
    }
}
