//! Typed saga instances.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::CorrelationId;
use saga_store::{SagaRecord, TimeoutToken, Version};

use crate::error::{Result, SagaError};
use crate::state::SagaState;
use crate::workflow::Saga;

/// Milestone recorded when an instance is created.
pub const STARTED: &str = "started";

/// One run of a workflow, decoded from its stored record.
pub struct SagaInstance<S: Saga> {
    pub(crate) correlation_id: CorrelationId,
    pub(crate) state: S::State,
    pub(crate) data: S::Data,
    pub(crate) failure_reason: Option<String>,
    pub(crate) pending_timeout: Option<TimeoutToken>,
    pub(crate) milestones: BTreeMap<String, DateTime<Utc>>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) version: Version,
}

impl<S: Saga> SagaInstance<S> {
    /// Creates an unsaved instance in the initial pseudostate.
    pub fn new(correlation_id: CorrelationId, now: DateTime<Utc>) -> Self {
        let mut milestones = BTreeMap::new();
        milestones.insert(STARTED.to_string(), now);
        Self {
            correlation_id,
            state: S::State::initial(),
            data: S::Data::default(),
            failure_reason: None,
            pending_timeout: None,
            milestones,
            started_at: now,
            updated_at: now,
            version: Version::initial(),
        }
    }

    /// Decodes a stored record.
    pub fn from_record(record: SagaRecord) -> Result<Self> {
        if record.saga_type != S::saga_type() {
            return Err(SagaError::SagaTypeMismatch {
                correlation_id: record.correlation_id,
                expected: S::saga_type(),
                actual: record.saga_type,
            });
        }

        let state = S::State::parse(&record.state).ok_or_else(|| SagaError::UnknownState {
            correlation_id: record.correlation_id,
            state: record.state.clone(),
        })?;

        Ok(Self {
            correlation_id: record.correlation_id,
            state,
            data: serde_json::from_value(record.data)?,
            failure_reason: record.failure_reason,
            pending_timeout: record.pending_timeout,
            milestones: record.milestones,
            started_at: record.started_at,
            updated_at: record.updated_at,
            version: record.version,
        })
    }

    /// Encodes the instance for storage.
    pub fn to_record(&self) -> Result<SagaRecord> {
        Ok(SagaRecord {
            correlation_id: self.correlation_id,
            saga_type: S::saga_type().to_string(),
            state: self.state.as_str().to_string(),
            data: serde_json::to_value(&self.data)?,
            failure_reason: self.failure_reason.clone(),
            pending_timeout: self.pending_timeout,
            milestones: self.milestones.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
            version: self.version,
        })
    }

    /// Returns the correlation ID.
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Returns the current state.
    pub fn state(&self) -> S::State {
        self.state
    }

    /// Returns the workflow's business fields.
    pub fn data(&self) -> &S::Data {
        &self.data
    }

    /// Returns the failure reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Returns the token of the armed timeout, if any.
    pub fn pending_timeout(&self) -> Option<TimeoutToken> {
        self.pending_timeout
    }

    /// Returns when a milestone was reached.
    pub fn milestone(&self, name: &str) -> Option<DateTime<Utc>> {
        self.milestones.get(name).copied()
    }

    /// Returns all recorded milestones.
    pub fn milestones(&self) -> &BTreeMap<String, DateTime<Utc>> {
        &self.milestones
    }

    /// Returns when the instance was created.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns when the instance last transitioned.
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns the stored version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns true if the instance is finished.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

impl<S: Saga> Clone for SagaInstance<S> {
    fn clone(&self) -> Self {
        Self {
            correlation_id: self.correlation_id,
            state: self.state,
            data: self.data.clone(),
            failure_reason: self.failure_reason.clone(),
            pending_timeout: self.pending_timeout,
            milestones: self.milestones.clone(),
            started_at: self.started_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }
}

impl<S: Saga> std::fmt::Debug for SagaInstance<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaInstance")
            .field("saga_type", &S::saga_type())
            .field("correlation_id", &self.correlation_id)
            .field("state", &self.state)
            .field("data", &self.data)
            .field("failure_reason", &self.failure_reason)
            .field("pending_timeout", &self.pending_timeout)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TicketSaga, TicketState};

    #[test]
    fn new_instance_is_unsaved_and_initial() {
        let now = Utc::now();
        let instance = SagaInstance::<TicketSaga>::new(CorrelationId::new(), now);

        assert_eq!(instance.state(), TicketState::Initial);
        assert_eq!(instance.version(), Version::initial());
        assert_eq!(instance.milestone(STARTED), Some(now));
        assert!(!instance.is_terminal());
    }

    #[test]
    fn record_round_trip_keeps_fields() {
        let mut instance = SagaInstance::<TicketSaga>::new(CorrelationId::new(), Utc::now());
        instance.state = TicketState::Holding;
        instance.data.seat = "12A".to_string();
        instance.pending_timeout = Some(TimeoutToken::new());
        instance.version = Version::first();

        let record = instance.to_record().unwrap();
        assert_eq!(record.saga_type, "Ticket");
        assert_eq!(record.state, "Holding");

        let decoded = SagaInstance::<TicketSaga>::from_record(record).unwrap();
        assert_eq!(decoded.state(), TicketState::Holding);
        assert_eq!(decoded.data().seat, "12A");
        assert_eq!(decoded.pending_timeout(), instance.pending_timeout());
    }

    #[test]
    fn foreign_record_is_rejected() {
        let instance = SagaInstance::<TicketSaga>::new(CorrelationId::new(), Utc::now());
        let mut record = instance.to_record().unwrap();
        record.saga_type = "BuyNow".to_string();

        assert!(matches!(
            SagaInstance::<TicketSaga>::from_record(record),
            Err(SagaError::SagaTypeMismatch { .. })
        ));
    }

    #[test]
    fn unknown_state_is_rejected() {
        let instance = SagaInstance::<TicketSaga>::new(CorrelationId::new(), Utc::now());
        let mut record = instance.to_record().unwrap();
        record.state = "Shipping".to_string();

        assert!(matches!(
            SagaInstance::<TicketSaga>::from_record(record),
            Err(SagaError::UnknownState { .. })
        ));
    }
}
