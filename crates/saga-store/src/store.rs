use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    CorrelationId, InstanceQuery, OutboxMessage, OutboxMessageId, Result, SagaRecord,
    ScheduledTimeout, StoreError, TimeoutChange, TimeoutToken, Version,
};

/// One unit of work produced by a saga transition.
///
/// The new instance state, the outbound messages it queued and the timeout
/// changes it requested are committed together or not at all.
#[derive(Debug, Clone)]
pub struct Commit {
    /// The instance state after the transition. Its version must be
    /// `expected_version.next()`.
    pub record: SagaRecord,

    /// Version the stored instance must be at for the commit to succeed.
    /// `Version::initial()` means the instance must not exist yet.
    pub expected_version: Version,

    /// Messages to relay after the commit, in order.
    pub outbox: Vec<OutboxMessage>,

    /// Timeouts to arm or disarm.
    pub timeouts: Vec<TimeoutChange>,
}

impl Commit {
    /// Creates a commit for a record expected to be at `expected_version`.
    pub fn new(record: SagaRecord, expected_version: Version) -> Self {
        Self {
            record,
            expected_version,
            outbox: Vec::new(),
            timeouts: Vec::new(),
        }
    }

    /// Queues an outbound message.
    pub fn publish(mut self, message: OutboxMessage) -> Self {
        self.outbox.push(message);
        self
    }

    /// Arms a timeout.
    pub fn schedule(mut self, timeout: ScheduledTimeout) -> Self {
        self.timeouts.push(TimeoutChange::Schedule(timeout));
        self
    }

    /// Disarms a timeout.
    pub fn cancel(mut self, token: TimeoutToken) -> Self {
        self.timeouts.push(TimeoutChange::Cancel(token));
        self
    }

    /// Returns the correlation ID of the instance being committed.
    pub fn correlation_id(&self) -> CorrelationId {
        self.record.correlation_id
    }

    /// Returns true if this commit creates the instance.
    pub fn is_insert(&self) -> bool {
        self.expected_version == Version::initial()
    }
}

/// Durable keyed storage for saga instances with an attached outbox.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads the instance for a correlation ID.
    ///
    /// Returns None if no instance exists.
    async fn load(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>>;

    /// Atomically persists a transition.
    ///
    /// Fails with `ConcurrencyConflict` if the stored version does not
    /// match `commit.expected_version`; nothing is written in that case.
    ///
    /// Returns the new version of the instance.
    async fn commit(&self, commit: Commit) -> Result<Version>;

    /// Retrieves instances matching a query, oldest update first.
    async fn query_instances(&self, query: InstanceQuery) -> Result<Vec<SagaRecord>>;

    /// Retrieves undispatched outbox messages in commit order.
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    /// Marks an outbox message as relayed.
    async fn mark_dispatched(&self, id: OutboxMessageId) -> Result<()>;

    /// Deletes relayed outbox messages dispatched before the cutoff.
    /// Undispatched messages are never removed. Returns how many were
    /// deleted.
    async fn prune_dispatched(&self, dispatched_before: DateTime<Utc>) -> Result<u64>;
}

/// Durable deferred-message facility.
///
/// Timeouts survive process restarts. Cancellation is best-effort: a
/// timeout already handed to a poller may still be delivered.
#[async_trait]
pub trait TimeoutScheduler: Send + Sync {
    /// Arms a timeout and returns its token.
    async fn schedule(&self, timeout: ScheduledTimeout) -> Result<TimeoutToken>;

    /// Disarms a timeout. Returns false if it was not armed.
    async fn unschedule(&self, token: TimeoutToken) -> Result<bool>;

    /// Retrieves armed timeouts due at `now`, earliest first.
    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledTimeout>>;

    /// Removes a timeout after it has been delivered.
    async fn acknowledge(&self, token: TimeoutToken) -> Result<()>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Checks if an instance exists for a correlation ID.
    async fn instance_exists(&self, correlation_id: CorrelationId) -> Result<bool> {
        Ok(self.load(correlation_id).await?.is_some())
    }

    /// Finds instances of `saga_type` parked in one of `states` without a
    /// transition for longer than `older_than`.
    async fn find_stuck(
        &self,
        saga_type: &str,
        states: Vec<String>,
        older_than: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<SagaRecord>> {
        let query = InstanceQuery::for_saga_type(saga_type)
            .states(states)
            .updated_before(now - older_than);
        self.query_instances(query).await
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}

/// Validates a commit before it is applied.
pub fn validate_commit(commit: &Commit) -> Result<()> {
    let expected_next = commit.expected_version.next();
    if commit.record.version != expected_next {
        return Err(StoreError::InvalidCommit(format!(
            "record version must be {expected_next}, got {}",
            commit.record.version
        )));
    }

    let correlation_id = commit.correlation_id();

    if commit
        .outbox
        .iter()
        .any(|m| m.correlation_id != correlation_id)
    {
        return Err(StoreError::InvalidCommit(
            "All outbox messages must belong to the committed saga".to_string(),
        ));
    }

    let foreign_timeout = commit.timeouts.iter().any(|change| match change {
        TimeoutChange::Schedule(t) => t.correlation_id != correlation_id,
        TimeoutChange::Cancel(_) => false,
    });
    if foreign_timeout {
        return Err(StoreError::InvalidCommit(
            "All scheduled timeouts must belong to the committed saga".to_string(),
        ));
    }

    Ok(())
}
