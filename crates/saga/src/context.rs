//! The view a transition rule gets of the instance it is moving.

use chrono::{DateTime, Utc};
use common::CorrelationId;

use crate::instance::SagaInstance;
use crate::workflow::Saga;

/// Mutable working copy handed to a transition rule.
///
/// Changes made here are persisted only if the whole transition commits.
pub struct TransitionContext<'a, S: Saga> {
    instance: &'a mut SagaInstance<S>,
    now: DateTime<Utc>,
    compensation_retry_limit: u32,
    published: Vec<S::Command>,
    escalated: bool,
}

impl<'a, S: Saga> TransitionContext<'a, S> {
    pub(crate) fn new(
        instance: &'a mut SagaInstance<S>,
        now: DateTime<Utc>,
        compensation_retry_limit: u32,
    ) -> Self {
        Self {
            instance,
            now,
            compensation_retry_limit,
            published: Vec::new(),
            escalated: false,
        }
    }

    /// Returns the correlation ID of the instance.
    pub fn correlation_id(&self) -> CorrelationId {
        self.instance.correlation_id
    }

    /// Returns the state the instance is leaving.
    pub fn state(&self) -> S::State {
        self.instance.state
    }

    /// Returns the processing time of the current message.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Returns the business fields.
    pub fn data(&self) -> &S::Data {
        &self.instance.data
    }

    /// Returns the business fields for mutation.
    pub fn data_mut(&mut self) -> &mut S::Data {
        &mut self.instance.data
    }

    /// Records that a milestone was reached now.
    pub fn milestone(&mut self, name: &str) {
        self.instance.milestones.insert(name.to_string(), self.now);
    }

    /// Records why the workflow failed or degraded.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.instance.failure_reason = Some(reason.into());
    }

    /// Returns the recorded failure reason.
    pub fn failure_reason(&self) -> Option<&str> {
        self.instance.failure_reason.as_deref()
    }

    /// Returns how many times a compensating command may be re-issued.
    pub fn compensation_retry_limit(&self) -> u32 {
        self.compensation_retry_limit
    }

    /// Queues a message to publish once the transition commits.
    pub fn publish(&mut self, command: S::Command) {
        self.published.push(command);
    }

    /// Returns the messages queued so far.
    pub fn published(&self) -> &[S::Command] {
        &self.published
    }

    /// Flags that compensation was given up on and needs manual
    /// reconciliation. The alert is raised only once the transition commits.
    pub fn escalate(&mut self) {
        self.escalated = true;
    }

    pub(crate) fn into_effects(self) -> Effects<S> {
        Effects {
            published: self.published,
            escalated: self.escalated,
        }
    }
}

/// What a rule produced besides the instance changes.
pub(crate) struct Effects<S: Saga> {
    pub(crate) published: Vec<S::Command>,
    pub(crate) escalated: bool,
}
