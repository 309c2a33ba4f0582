use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CorrelationId;

/// Opaque handle to a scheduled timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeoutToken(Uuid);

impl TimeoutToken {
    /// Creates a new random token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a token from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TimeoutToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TimeoutToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A self-addressed message deferred until `due_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTimeout {
    /// Handle used to cancel or acknowledge the timeout.
    pub token: TimeoutToken,

    /// Saga instance the message will be delivered to.
    pub correlation_id: CorrelationId,

    /// Workflow that owns the instance.
    pub saga_type: String,

    /// Earliest delivery time.
    pub due_at: DateTime<Utc>,

    /// The message to deliver, as JSON.
    pub payload: serde_json::Value,
}

impl ScheduledTimeout {
    /// Creates a timeout due `delay` after `now`, with a fresh token.
    pub fn after(
        correlation_id: CorrelationId,
        saga_type: impl Into<String>,
        delay: chrono::Duration,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            token: TimeoutToken::new(),
            correlation_id,
            saga_type: saga_type.into(),
            due_at: now + delay,
            payload,
        }
    }

    /// Returns true if the timeout should fire at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.due_at <= now
    }
}

/// A change to the armed timeouts applied as part of a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeoutChange {
    /// Arm a new timeout.
    Schedule(ScheduledTimeout),
    /// Disarm a previously scheduled timeout. Missing tokens are ignored.
    Cancel(TimeoutToken),
}
