use chrono::{DateTime, Utc};

/// Builder for querying saga instances.
///
/// Used by operational tooling to find instances parked in a state for
/// longer than expected.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    /// Filter by saga type.
    pub saga_type: Option<String>,

    /// Filter by current state (any of these states).
    pub states: Option<Vec<String>>,

    /// Only instances whose last transition happened before this time.
    pub updated_before: Option<DateTime<Utc>>,

    /// Maximum number of instances to return.
    pub limit: Option<usize>,

    /// Number of instances to skip.
    pub offset: Option<usize>,
}

impl InstanceQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for instances of a specific saga type.
    pub fn for_saga_type(saga_type: impl Into<String>) -> Self {
        Self {
            saga_type: Some(saga_type.into()),
            ..Default::default()
        }
    }

    /// Filters by saga type.
    pub fn saga_type(mut self, saga_type: impl Into<String>) -> Self {
        self.saga_type = Some(saga_type.into());
        self
    }

    /// Filters by a single state.
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.states = Some(vec![state.into()]);
        self
    }

    /// Filters by multiple states (any of these).
    pub fn states(mut self, states: Vec<String>) -> Self {
        self.states = Some(states);
        self
    }

    /// Filters to instances idle since before this timestamp (exclusive).
    pub fn updated_before(mut self, timestamp: DateTime<Utc>) -> Self {
        self.updated_before = Some(timestamp);
        self
    }

    /// Limits the number of instances returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of instances.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}
