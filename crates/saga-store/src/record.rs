use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CorrelationId, TimeoutToken};

/// Optimistic-concurrency counter for a saga instance.
///
/// An instance that has never been persisted is at version 0; every
/// committed transition increments the version by exactly one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of an instance that has not been persisted yet.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the version written by the first commit.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// The persisted form of a saga instance.
///
/// The store is workflow-agnostic: the state tag is stored as its string
/// name and the workflow payload as JSON. The engine converts between this
/// record and its typed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Primary key and message-correlation key.
    pub correlation_id: CorrelationId,

    /// The workflow that owns this instance (e.g. "BuyNow").
    pub saga_type: String,

    /// Name of the current state.
    pub state: String,

    /// Workflow-specific business fields.
    pub data: serde_json::Value,

    /// Explanation recorded on a failure, compensation or soft-success path.
    pub failure_reason: Option<String>,

    /// Token of the currently armed timeout, if any.
    pub pending_timeout: Option<TimeoutToken>,

    /// One timestamp per milestone reached, keyed by milestone name.
    pub milestones: BTreeMap<String, DateTime<Utc>>,

    /// When the instance was created.
    pub started_at: DateTime<Utc>,

    /// When the last transition was committed.
    pub updated_at: DateTime<Utc>,

    /// Version after the last committed transition.
    pub version: Version,
}

impl SagaRecord {
    /// Returns the time elapsed since the last committed transition.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.updated_at
    }
}
