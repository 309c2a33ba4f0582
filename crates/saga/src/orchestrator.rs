//! Saga orchestrator for table-driven workflows.

use chrono::Utc;
use common::CorrelationId;
use saga_store::{
    Commit, OutboxMessage, SagaStore, SagaStoreExt, ScheduledTimeout, TimeoutChange,
    TimeoutToken, Version,
};
use serde::Serialize;

use crate::config::EngineConfig;
use crate::context::{Effects, TransitionContext};
use crate::definition::{SagaDefinition, TimeoutEffect};
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::message::{OutboundMessage, SagaMessage};
use crate::state::SagaState;
use crate::workflow::Saga;

/// Why a message was absorbed without a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// No instance exists and the message is not the start event.
    UnknownInstance,
    /// The instance already reached a terminal state.
    Finalized,
    /// The current state has no rule for the message.
    NoTransition,
    /// The timeout was superseded or already handled.
    StaleTimeout,
}

impl IgnoreReason {
    /// Returns the reason as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            IgnoreReason::UnknownInstance => "unknown_instance",
            IgnoreReason::Finalized => "finalized",
            IgnoreReason::NoTransition => "no_transition",
            IgnoreReason::StaleTimeout => "stale_timeout",
        }
    }
}

/// Result of processing one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// A transition was committed.
    Transitioned {
        correlation_id: CorrelationId,
        from: &'static str,
        to: &'static str,
        published: usize,
        version: Version,
    },
    /// The message was absorbed.
    Ignored {
        correlation_id: CorrelationId,
        reason: IgnoreReason,
    },
}

impl Outcome {
    /// Returns true if a transition was committed.
    pub fn is_transitioned(&self) -> bool {
        matches!(self, Outcome::Transitioned { .. })
    }

    /// Returns the ignore reason, if the message was absorbed.
    pub fn ignored_reason(&self) -> Option<IgnoreReason> {
        match self {
            Outcome::Ignored { reason, .. } => Some(*reason),
            Outcome::Transitioned { .. } => None,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Transitioned { .. } => "transitioned",
            Outcome::Ignored { reason, .. } => reason.as_str(),
        }
    }
}

/// Drives instances of one workflow through its transition table.
///
/// Every message is handled as load, look up rule, apply to a working copy,
/// and commit once with the version check. The commit carries the instance
/// state, the queued outbound messages and the timeout changes, so either
/// all of a transition's effects happen or none do.
pub struct SagaOrchestrator<S: Saga, St: SagaStore> {
    store: St,
    definition: SagaDefinition<S>,
    config: EngineConfig,
}

impl<S: Saga, St: SagaStore> SagaOrchestrator<S, St> {
    /// Creates an orchestrator, validating the workflow definition.
    pub fn new(store: St, config: EngineConfig) -> Result<Self> {
        let definition = S::definition()?;
        Ok(Self::with_definition(store, definition, config))
    }

    /// Creates an orchestrator for an already validated definition.
    pub fn with_definition(store: St, definition: SagaDefinition<S>, config: EngineConfig) -> Self {
        Self {
            store,
            definition,
            config,
        }
    }

    /// Returns the transition table.
    pub fn definition(&self) -> &SagaDefinition<S> {
        &self.definition
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &St {
        &self.store
    }

    /// Processes a message that did not come from the timeout scheduler.
    pub async fn process(&self, message: S::Event) -> Result<Outcome> {
        self.deliver(message, None).await
    }

    /// Processes a message, retrying the whole cycle on persist conflicts.
    ///
    /// `timeout_token` must be set when delivering a scheduled timeout;
    /// timeout messages without the instance's current token are absorbed.
    #[tracing::instrument(
        skip(self, message),
        fields(saga_type = S::saga_type(), message_type = message.message_type())
    )]
    pub async fn deliver(
        &self,
        message: S::Event,
        timeout_token: Option<TimeoutToken>,
    ) -> Result<Outcome> {
        let message_type = message.message_type();

        if !self.definition.handles(message_type) {
            return Err(self.unroutable(message_type, "message type not registered"));
        }
        let Some(correlation_id) = self.definition.correlate(&message) else {
            return Err(self.unroutable(message_type, "missing correlation id"));
        };

        let attempts = self.config.max_conflict_retries.max(1);
        for attempt in 1..=attempts {
            match self.apply_once(correlation_id, &message, timeout_token).await {
                Err(e) if e.is_conflict() => {
                    metrics::counter!("saga_persist_conflicts_total", "saga_type" => S::saga_type())
                        .increment(1);
                    tracing::debug!(%correlation_id, attempt, "persist conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Ok(outcome) => {
                    metrics::counter!(
                        "saga_messages_total",
                        "saga_type" => S::saga_type(),
                        "outcome" => outcome.label()
                    )
                    .increment(1);
                    return Ok(outcome);
                }
                Err(e) => {
                    metrics::counter!(
                        "saga_messages_total",
                        "saga_type" => S::saga_type(),
                        "outcome" => "error"
                    )
                    .increment(1);
                    return Err(e);
                }
            }
        }

        tracing::error!(
            %correlation_id,
            attempts,
            "persist conflict not resolved; transition effects were not applied"
        );
        metrics::counter!("saga_conflict_retries_exhausted_total", "saga_type" => S::saga_type())
            .increment(1);
        Err(SagaError::ConflictRetriesExhausted {
            correlation_id,
            attempts,
        })
    }

    async fn apply_once(
        &self,
        correlation_id: CorrelationId,
        message: &S::Event,
        timeout_token: Option<TimeoutToken>,
    ) -> Result<Outcome> {
        let message_type = message.message_type();
        let now = Utc::now();

        let current = match self.store.load(correlation_id).await? {
            Some(record) => SagaInstance::<S>::from_record(record)?,
            None if message_type == self.definition.start_event() => {
                SagaInstance::new(correlation_id, now)
            }
            None => return Ok(ignored(correlation_id, IgnoreReason::UnknownInstance)),
        };

        if current.is_terminal() {
            tracing::debug!(%correlation_id, state = current.state.as_str(), "instance finished, message absorbed");
            return Ok(ignored(correlation_id, IgnoreReason::Finalized));
        }

        if self.definition.is_timeout_event(message_type)
            && (timeout_token.is_none() || timeout_token != current.pending_timeout)
        {
            tracing::debug!(%correlation_id, "stale timeout absorbed");
            return Ok(ignored(correlation_id, IgnoreReason::StaleTimeout));
        }

        let Some(rule) = self.definition.rule(current.state, message_type) else {
            tracing::debug!(
                %correlation_id,
                state = current.state.as_str(),
                "no transition for message, absorbed"
            );
            return Ok(ignored(correlation_id, IgnoreReason::NoTransition));
        };

        let mut next = current.clone();
        let mut ctx = TransitionContext::new(&mut next, now, self.config.compensation_retry_limit);
        let target = rule.apply(&mut ctx, message)?;
        let Effects {
            published,
            escalated,
        } = ctx.into_effects();

        next.state = target;
        next.updated_at = now;
        next.version = current.version.next();

        let mut timeouts = Vec::new();
        match rule.effective_timeout(target) {
            TimeoutEffect::Keep => {}
            TimeoutEffect::Cancel => {
                if let Some(token) = next.pending_timeout.take() {
                    timeouts.push(TimeoutChange::Cancel(token));
                }
            }
            TimeoutEffect::Schedule => {
                if let Some(token) = next.pending_timeout.take() {
                    timeouts.push(TimeoutChange::Cancel(token));
                }
                if let Some(timer) = self.definition.timeout() {
                    let payload = serde_json::to_value(timer.message(&next, now + timer.delay()))?;
                    let timeout = ScheduledTimeout::after(
                        correlation_id,
                        S::saga_type(),
                        timer.delay(),
                        payload,
                        now,
                    );
                    next.pending_timeout = Some(timeout.token);
                    timeouts.push(TimeoutChange::Schedule(timeout));
                }
            }
        }

        let mut commit = Commit::new(next.to_record()?, current.version);
        for command in &published {
            let message =
                OutboxMessage::new(correlation_id, S::saga_type(), command.message_type(), command)?
                    .created_at(now);
            commit = commit.publish(message);
        }
        commit.timeouts = timeouts;

        let version = self.store.commit(commit).await?;

        let from = current.state.as_str();
        let to = target.as_str();
        tracing::info!(%correlation_id, from, to, published = published.len(), "saga transitioned");
        metrics::counter!(
            "saga_transitions_total",
            "saga_type" => S::saga_type(),
            "from" => from,
            "to" => to
        )
        .increment(1);

        if escalated {
            tracing::error!(
                %correlation_id,
                from,
                reason = next.failure_reason.as_deref().unwrap_or_default(),
                "compensation was never confirmed; manual reconciliation required"
            );
            metrics::counter!("saga_compensation_escalations_total", "saga_type" => S::saga_type())
                .increment(1);
        }

        if target.is_terminal() {
            let elapsed = (now - next.started_at).to_std().unwrap_or_default();
            metrics::histogram!("saga_duration_seconds", "saga_type" => S::saga_type(), "state" => to)
                .record(elapsed.as_secs_f64());
        }

        Ok(Outcome::Transitioned {
            correlation_id,
            from,
            to,
            published: published.len(),
            version,
        })
    }

    pub(crate) fn unroutable(&self, message_type: &str, reason: &str) -> SagaError {
        tracing::warn!(saga_type = S::saga_type(), message_type, reason, "unroutable message dropped");
        metrics::counter!(
            "saga_messages_total",
            "saga_type" => S::saga_type(),
            "outcome" => "unroutable"
        )
        .increment(1);
        SagaError::Unroutable {
            message_type: message_type.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Loads an instance.
    pub async fn get(&self, correlation_id: CorrelationId) -> Result<Option<SagaInstance<S>>> {
        self.store
            .load(correlation_id)
            .await?
            .map(SagaInstance::from_record)
            .transpose()
    }

    /// Finds non-terminal instances that have not transitioned for longer
    /// than `older_than`.
    pub async fn find_stuck(&self, older_than: chrono::Duration) -> Result<Vec<SagaInstance<S>>> {
        let states = S::State::active()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        self.store
            .find_stuck(S::saga_type(), states, older_than, Utc::now())
            .await?
            .into_iter()
            .map(SagaInstance::from_record)
            .collect()
    }
}

fn ignored(correlation_id: CorrelationId, reason: IgnoreReason) -> Outcome {
    Outcome::Ignored {
        correlation_id,
        reason,
    }
}
