use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    Commit, CorrelationId, InstanceQuery, OutboxMessage, OutboxMessageId, Result, SagaRecord,
    ScheduledTimeout, StoreError, TimeoutChange, TimeoutToken, Version,
    store::{SagaStore, TimeoutScheduler, validate_commit},
};

#[derive(Debug, Clone)]
struct OutboxEntry {
    message: OutboxMessage,
    dispatched_at: Option<DateTime<Utc>>,
}

/// Outbox entries keyed by commit sequence, with the undispatched ones and
/// the id lookup indexed separately.
#[derive(Debug, Default)]
struct Outbox {
    next_sequence: u64,
    entries: BTreeMap<u64, OutboxEntry>,
    pending: BTreeSet<u64>,
    by_id: HashMap<OutboxMessageId, u64>,
}

impl Outbox {
    fn push(&mut self, message: OutboxMessage) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.by_id.insert(message.id, sequence);
        self.pending.insert(sequence);
        self.entries.insert(
            sequence,
            OutboxEntry {
                message,
                dispatched_at: None,
            },
        );
    }

    fn iter(&self) -> impl Iterator<Item = &OutboxEntry> {
        self.entries.values()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
        self.by_id.clear();
    }
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<CorrelationId, SagaRecord>,
    outbox: Outbox,
    timeouts: HashMap<TimeoutToken, ScheduledTimeout>,
}

impl State {
    fn apply_timeout_change(&mut self, change: TimeoutChange) {
        match change {
            TimeoutChange::Schedule(timeout) => {
                self.timeouts.insert(timeout.token, timeout);
            }
            TimeoutChange::Cancel(token) => {
                self.timeouts.remove(&token);
            }
        }
    }
}

/// In-memory saga store for testing and single-process deployments.
///
/// Instances, outbox and timeouts share one lock so a commit is atomic in
/// the same way as the PostgreSQL transaction. Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    state: Arc<RwLock<State>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored instances.
    pub async fn instance_count(&self) -> usize {
        self.state.read().await.instances.len()
    }

    /// Returns the retained outbox messages, in commit order.
    pub async fn outbox_messages(&self) -> Vec<OutboxMessage> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .map(|e| e.message.clone())
            .collect()
    }

    /// Returns the outbox messages queued for one saga instance.
    pub async fn outbox_for(&self, correlation_id: CorrelationId) -> Vec<OutboxMessage> {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .filter(|e| e.message.correlation_id == correlation_id)
            .map(|e| e.message.clone())
            .collect()
    }

    /// Returns the number of relayed outbox messages.
    pub async fn dispatched_count(&self) -> usize {
        self.state
            .read()
            .await
            .outbox
            .iter()
            .filter(|e| e.dispatched_at.is_some())
            .count()
    }

    /// Returns the timeouts currently armed for one saga instance.
    pub async fn timeouts_for(&self, correlation_id: CorrelationId) -> Vec<ScheduledTimeout> {
        self.state
            .read()
            .await
            .timeouts
            .values()
            .filter(|t| t.correlation_id == correlation_id)
            .cloned()
            .collect()
    }

    /// Returns the number of armed timeouts.
    pub async fn timeout_count(&self) -> usize {
        self.state.read().await.timeouts.len()
    }

    /// Clears all instances, outbox messages and timeouts.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.instances.clear();
        state.outbox.clear();
        state.timeouts.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn load(&self, correlation_id: CorrelationId) -> Result<Option<SagaRecord>> {
        Ok(self
            .state
            .read()
            .await
            .instances
            .get(&correlation_id)
            .cloned())
    }

    async fn commit(&self, commit: Commit) -> Result<Version> {
        validate_commit(&commit)?;

        let correlation_id = commit.correlation_id();
        let mut state = self.state.write().await;

        let actual = state
            .instances
            .get(&correlation_id)
            .map(|r| r.version)
            .unwrap_or(Version::initial());

        if actual != commit.expected_version {
            return Err(StoreError::ConcurrencyConflict {
                correlation_id,
                expected: commit.expected_version,
                actual,
            });
        }

        let version = commit.record.version;
        state.instances.insert(correlation_id, commit.record);
        for message in commit.outbox {
            state.outbox.push(message);
        }
        for change in commit.timeouts {
            state.apply_timeout_change(change);
        }

        Ok(version)
    }

    async fn query_instances(&self, query: InstanceQuery) -> Result<Vec<SagaRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .instances
            .values()
            .filter(|r| {
                if let Some(ref saga_type) = query.saga_type
                    && &r.saga_type != saga_type
                {
                    return false;
                }
                if let Some(ref states) = query.states
                    && !states.contains(&r.state)
                {
                    return false;
                }
                if let Some(before) = query.updated_before
                    && r.updated_at >= before
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();

        records.sort_by(|a, b| {
            a.updated_at
                .cmp(&b.updated_at)
                .then(a.correlation_id.cmp(&b.correlation_id))
        });

        let offset = query.offset.unwrap_or(0);
        let records = records.into_iter().skip(offset);
        let records = match query.limit {
            Some(limit) => records.take(limit).collect(),
            None => records.collect(),
        };

        Ok(records)
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        let state = self.state.read().await;
        let outbox = &state.outbox;
        Ok(outbox
            .pending
            .iter()
            .take(limit)
            .filter_map(|sequence| outbox.entries.get(sequence))
            .map(|e| e.message.clone())
            .collect())
    }

    async fn mark_dispatched(&self, id: OutboxMessageId) -> Result<()> {
        let mut state = self.state.write().await;
        let outbox = &mut state.outbox;
        let Some(&sequence) = outbox.by_id.get(&id) else {
            return Ok(());
        };
        if outbox.pending.remove(&sequence)
            && let Some(entry) = outbox.entries.get_mut(&sequence)
        {
            entry.dispatched_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn prune_dispatched(&self, dispatched_before: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let outbox = &mut state.outbox;
        let expired: Vec<u64> = outbox
            .entries
            .iter()
            .filter(|(_, e)| e.dispatched_at.is_some_and(|at| at < dispatched_before))
            .map(|(sequence, _)| *sequence)
            .collect();

        for sequence in &expired {
            if let Some(entry) = outbox.entries.remove(sequence) {
                outbox.by_id.remove(&entry.message.id);
            }
        }
        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl TimeoutScheduler for InMemorySagaStore {
    async fn schedule(&self, timeout: ScheduledTimeout) -> Result<TimeoutToken> {
        let token = timeout.token;
        self.state
            .write()
            .await
            .apply_timeout_change(TimeoutChange::Schedule(timeout));
        Ok(token)
    }

    async fn unschedule(&self, token: TimeoutToken) -> Result<bool> {
        Ok(self.state.write().await.timeouts.remove(&token).is_some())
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<ScheduledTimeout>> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state
            .timeouts
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|t| t.due_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn acknowledge(&self, token: TimeoutToken) -> Result<()> {
        self.state.write().await.timeouts.remove(&token);
        Ok(())
    }
}
