//! The closed set of domain fact tags carried by the pipeline.
//!
//! Event types are a tagged union rather than free strings so that dispatch is
//! exhaustively matched: an event type without a routing entry or a consumer
//! arm is a compile-time error. Unknown *strings* can still arrive from the
//! outbox table (a producer deployed ahead of the relay, or a typo in routing
//! config); those fail loudly as [`UnknownEventType`] and are counted as
//! permanent mapping failures by the relay rather than crashing its loop.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Raised when a string tag has no corresponding [`EventType`].
///
/// Missing routing config is the most common operational mistake when adding
/// new fact types, so this is surfaced loudly instead of being dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

/// A domain fact tag.
///
/// The serialized form is the dotted wire tag (e.g. `session.started`), both
/// in envelope JSON and in message headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A respondent opened a survey session.
    #[serde(rename = "session.started")]
    SessionStarted,
    /// A session reached the end of the survey.
    #[serde(rename = "session.completed")]
    SessionCompleted,
    /// A session was cut short (screen-out, quota-full, abandonment sweep).
    #[serde(rename = "session.terminated")]
    SessionTerminated,
    /// A respondent answered a question.
    #[serde(rename = "answer.submitted")]
    AnswerSubmitted,
    /// A quota slot was tentatively reserved for a session.
    #[serde(rename = "quota.reserved")]
    QuotaReserved,
    /// A quota reservation was abandoned without consuming capacity.
    #[serde(rename = "quota.released")]
    QuotaReleased,
    /// A quota reservation was converted into a counted admission.
    #[serde(rename = "quota.finalized")]
    QuotaFinalized,
    /// A collector started accepting respondents.
    #[serde(rename = "collector.opened")]
    CollectorOpened,
    /// A collector stopped accepting respondents.
    #[serde(rename = "collector.closed")]
    CollectorClosed,
}

impl EventType {
    /// Every event type the pipeline knows about, for startup validation and
    /// table-driven tests.
    pub const ALL: [Self; 9] = [
        Self::SessionStarted,
        Self::SessionCompleted,
        Self::SessionTerminated,
        Self::AnswerSubmitted,
        Self::QuotaReserved,
        Self::QuotaReleased,
        Self::QuotaFinalized,
        Self::CollectorOpened,
        Self::CollectorClosed,
    ];

    /// The dotted wire tag for this event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionStarted => "session.started",
            Self::SessionCompleted => "session.completed",
            Self::SessionTerminated => "session.terminated",
            Self::AnswerSubmitted => "answer.submitted",
            Self::QuotaReserved => "quota.reserved",
            Self::QuotaReleased => "quota.released",
            Self::QuotaFinalized => "quota.finalized",
            Self::CollectorOpened => "collector.opened",
            Self::CollectorClosed => "collector.closed",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session.started" => Ok(Self::SessionStarted),
            "session.completed" => Ok(Self::SessionCompleted),
            "session.terminated" => Ok(Self::SessionTerminated),
            "answer.submitted" => Ok(Self::AnswerSubmitted),
            "quota.reserved" => Ok(Self::QuotaReserved),
            "quota.released" => Ok(Self::QuotaReleased),
            "quota.finalized" => Ok(Self::QuotaFinalized),
            "collector.opened" => Ok(Self::CollectorOpened),
            "collector.closed" => Ok(Self::CollectorClosed),
            other => Err(UnknownEventType(other.to_string())),
        }
    }
}
