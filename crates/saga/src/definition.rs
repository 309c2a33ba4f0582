//! Transition tables and their startup validation.
//!
//! A [`SagaDefinition`] maps `(state, message type)` to exactly one
//! [`TransitionRule`]. Rules are plain function pointers so the table is
//! static data that can be checked as a whole before any message is
//! processed:
//!
//! ```text
//! (Initial, Started) ──► Reserving ──► ... ──► Completed
//!                            │
//!                            └── TimedOut ──► Failed
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use common::CorrelationId;
use thiserror::Error;

use crate::context::TransitionContext;
use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::message::SagaMessage;
use crate::state::SagaState;
use crate::workflow::Saga;

/// Mutation applied by a single-target rule.
pub type Apply<S> = fn(&mut TransitionContext<'_, S>, &<S as Saga>::Event);

/// Mutation applied by a branching rule; returns the chosen target.
pub type Decide<S> =
    fn(&mut TransitionContext<'_, S>, &<S as Saga>::Event) -> <S as Saga>::State;

/// Extracts the correlation ID from an event.
pub type Correlate<S> = fn(&<S as Saga>::Event) -> Option<CorrelationId>;

/// Builds the self-addressed timeout message, given the instance and the
/// time the timeout becomes due.
pub type TimeoutMessage<S> = fn(&SagaInstance<S>, DateTime<Utc>) -> <S as Saga>::Event;

/// What a rule does to the instance's armed timeout.
///
/// Rules entering a terminal state always cancel, whatever they declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEffect {
    /// Leave the armed timeout as it is.
    Keep,
    /// Cancel any armed timeout and arm a fresh one.
    Schedule,
    /// Cancel any armed timeout.
    Cancel,
}

enum Action<S: Saga> {
    Goto { target: S::State, apply: Apply<S> },
    Branch { targets: Vec<S::State>, decide: Decide<S> },
}

/// One entry of the transition table.
pub struct TransitionRule<S: Saga> {
    from: S::State,
    event: &'static str,
    action: Action<S>,
    timeout: TimeoutEffect,
}

/// A rule whose target has not been chosen yet.
pub struct RuleBuilder<S: Saga> {
    from: S::State,
    event: &'static str,
}

impl<S: Saga> RuleBuilder<S> {
    /// Moves to `target` after applying `apply`.
    pub fn goto(self, target: S::State, apply: Apply<S>) -> TransitionRule<S> {
        TransitionRule {
            from: self.from,
            event: self.event,
            action: Action::Goto { target, apply },
            timeout: TimeoutEffect::Keep,
        }
    }

    /// Moves to whichever of `targets` the decision function returns.
    pub fn branch(self, targets: &[S::State], decide: Decide<S>) -> TransitionRule<S> {
        TransitionRule {
            from: self.from,
            event: self.event,
            action: Action::Branch {
                targets: targets.to_vec(),
                decide,
            },
            timeout: TimeoutEffect::Keep,
        }
    }
}

impl<S: Saga> TransitionRule<S> {
    /// Starts a rule for `event` received in state `from`.
    pub fn on(from: S::State, event: &'static str) -> RuleBuilder<S> {
        RuleBuilder { from, event }
    }

    /// Arms a fresh timeout when the rule fires.
    pub fn schedule_timeout(mut self) -> Self {
        self.timeout = TimeoutEffect::Schedule;
        self
    }

    /// Cancels the armed timeout when the rule fires.
    pub fn cancel_timeout(mut self) -> Self {
        self.timeout = TimeoutEffect::Cancel;
        self
    }

    /// Returns the state the rule applies in.
    pub fn from(&self) -> S::State {
        self.from
    }

    /// Returns the message type the rule reacts to.
    pub fn event(&self) -> &'static str {
        self.event
    }

    /// Returns every state the rule may move to.
    pub fn targets(&self) -> Vec<S::State> {
        match &self.action {
            Action::Goto { target, .. } => vec![*target],
            Action::Branch { targets, .. } => targets.clone(),
        }
    }

    /// Returns the declared timeout effect.
    pub fn timeout_effect(&self) -> TimeoutEffect {
        self.timeout
    }

    /// Returns the effect applied when moving to `target`.
    pub fn effective_timeout(&self, target: S::State) -> TimeoutEffect {
        if target.is_terminal() {
            TimeoutEffect::Cancel
        } else {
            self.timeout
        }
    }

    pub(crate) fn apply(
        &self,
        ctx: &mut TransitionContext<'_, S>,
        event: &S::Event,
    ) -> Result<S::State> {
        match &self.action {
            Action::Goto { target, apply } => {
                apply(ctx, event);
                Ok(*target)
            }
            Action::Branch { targets, decide } => {
                let target = decide(ctx, event);
                if targets.contains(&target) {
                    Ok(target)
                } else {
                    Err(SagaError::UndeclaredTarget {
                        state: self.from.as_str(),
                        event: self.event,
                        target: target.as_str(),
                    })
                }
            }
        }
    }
}

/// The workflow's self-addressed timeout.
pub struct TimeoutSpec<S: Saga> {
    delay: chrono::Duration,
    event: &'static str,
    active_in: Vec<S::State>,
    message: TimeoutMessage<S>,
}

impl<S: Saga> TimeoutSpec<S> {
    /// Creates a timeout delivering `event` after `delay`.
    pub fn new(delay: chrono::Duration, event: &'static str, message: TimeoutMessage<S>) -> Self {
        Self {
            delay,
            event,
            active_in: Vec::new(),
            message,
        }
    }

    /// Declares the states in which the timeout guards progress.
    pub fn active_in(mut self, states: &[S::State]) -> Self {
        self.active_in = states.to_vec();
        self
    }

    /// Returns the delay between arming and firing.
    pub fn delay(&self) -> chrono::Duration {
        self.delay
    }

    /// Returns the timeout's message type.
    pub fn event(&self) -> &'static str {
        self.event
    }

    /// Returns true if the timeout guards `state`.
    pub fn is_active_in(&self, state: S::State) -> bool {
        self.active_in.contains(&state)
    }

    /// Builds the timeout message for an instance.
    pub fn message(&self, instance: &SagaInstance<S>, due_at: DateTime<Utc>) -> S::Event {
        (self.message)(instance, due_at)
    }
}

/// A validated transition table for one workflow.
pub struct SagaDefinition<S: Saga> {
    start_event: &'static str,
    events: HashMap<&'static str, Correlate<S>>,
    rules: HashMap<(S::State, &'static str), TransitionRule<S>>,
    timeout: Option<TimeoutSpec<S>>,
}

impl<S: Saga> std::fmt::Debug for SagaDefinition<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaDefinition")
            .field("start_event", &self.start_event)
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

impl<S: Saga> SagaDefinition<S> {
    /// Starts building a definition.
    pub fn builder() -> SagaDefinitionBuilder<S> {
        SagaDefinitionBuilder {
            start_event: None,
            events: Vec::new(),
            rules: Vec::new(),
            timeout: None,
        }
    }

    /// Returns the message type that creates instances.
    pub fn start_event(&self) -> &'static str {
        self.start_event
    }

    /// Returns true if the workflow reacts to `message_type`.
    pub fn handles(&self, message_type: &str) -> bool {
        self.events.contains_key(message_type)
    }

    /// Returns every registered message type, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.events.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Extracts the correlation ID through the event's registered extractor.
    pub fn correlate(&self, event: &S::Event) -> Option<CorrelationId> {
        let extract = self.events.get(event.message_type())?;
        extract(event)
    }

    /// Looks up the rule for a message received in `state`.
    pub fn rule(&self, state: S::State, message_type: &str) -> Option<&TransitionRule<S>> {
        let (&event, _) = self.events.get_key_value(message_type)?;
        self.rules.get(&(state, event))
    }

    /// Returns the timeout, if the workflow has one.
    pub fn timeout(&self) -> Option<&TimeoutSpec<S>> {
        self.timeout.as_ref()
    }

    /// Returns true if `message_type` is the workflow's timeout message.
    pub fn is_timeout_event(&self, message_type: &str) -> bool {
        self.timeout.as_ref().is_some_and(|t| t.event == message_type)
    }

    /// Iterates over all rules.
    pub fn rules(&self) -> impl Iterator<Item = &TransitionRule<S>> {
        self.rules.values()
    }
}

/// Collects events, rules and the timeout before validation.
pub struct SagaDefinitionBuilder<S: Saga> {
    start_event: Option<&'static str>,
    events: Vec<(&'static str, Correlate<S>)>,
    rules: Vec<TransitionRule<S>>,
    timeout: Option<TimeoutSpec<S>>,
}

fn message_correlation<S: Saga>(event: &S::Event) -> Option<CorrelationId> {
    Some(event.correlation_id()).filter(|id| !id.as_uuid().is_nil())
}

impl<S: Saga> SagaDefinitionBuilder<S> {
    /// Registers the event that creates instances.
    pub fn start_with(mut self, event: &'static str) -> Self {
        self.start_event = Some(event);
        self.event(event)
    }

    /// Registers an event using the message's own correlation ID.
    pub fn event(self, event: &'static str) -> Self {
        self.event_with(event, message_correlation::<S>)
    }

    /// Registers several events using their own correlation IDs.
    pub fn events(self, events: &[&'static str]) -> Self {
        events.iter().fold(self, |builder, e| builder.event(*e))
    }

    /// Registers an event with a custom correlation extractor.
    pub fn event_with(mut self, event: &'static str, correlate: Correlate<S>) -> Self {
        self.events.retain(|(e, _)| *e != event);
        self.events.push((event, correlate));
        self
    }

    /// Sets the workflow timeout and registers its message.
    pub fn timeout(mut self, timeout: TimeoutSpec<S>) -> Self {
        let event = timeout.event;
        self.timeout = Some(timeout);
        self.event(event)
    }

    /// Adds a transition rule.
    pub fn rule(mut self, rule: TransitionRule<S>) -> Self {
        self.rules.push(rule);
        self
    }

    /// Validates the table and returns the definition, or every problem
    /// found.
    pub fn build(self) -> std::result::Result<SagaDefinition<S>, DefinitionError> {
        let violations = self.violations();
        if !violations.is_empty() {
            return Err(DefinitionError {
                saga_type: S::saga_type(),
                violations,
            });
        }

        let SagaDefinitionBuilder {
            start_event,
            events,
            rules,
            timeout,
        } = self;

        Ok(SagaDefinition {
            // Checked by `violations`.
            start_event: start_event.unwrap_or_default(),
            events: events.into_iter().collect(),
            rules: rules
                .into_iter()
                .map(|rule| ((rule.from, rule.event), rule))
                .collect(),
            timeout,
        })
    }

    fn violations(&self) -> Vec<Violation> {
        let mut violations = Vec::new();
        let initial = S::State::initial();
        let registered: HashSet<&str> = self.events.iter().map(|(e, _)| *e).collect();

        match self.start_event {
            None => violations.push(Violation::MissingStartEvent),
            Some(start) => {
                if !self.rules.iter().any(|r| r.from == initial && r.event == start) {
                    violations.push(Violation::StartNotHandled { event: start });
                }
            }
        }

        if !S::State::all().iter().any(|s| s.is_terminal()) {
            violations.push(Violation::NoTerminalState);
        }

        let mut seen = HashSet::new();
        for rule in &self.rules {
            let state = rule.from.as_str();
            let event = rule.event;

            if !seen.insert((rule.from, event)) {
                violations.push(Violation::DuplicateRule { state, event });
            }
            if !registered.contains(event) {
                violations.push(Violation::UnregisteredEvent { state, event });
            }
            if rule.from.is_terminal() {
                violations.push(Violation::TerminalHasRule { state, event });
            }
            if rule.from == initial && Some(event) != self.start_event {
                violations.push(Violation::InitialHandlesOnlyStart { event });
            }
            if rule.targets().is_empty() {
                violations.push(Violation::EmptyBranch { state, event });
            }
            if rule.timeout == TimeoutEffect::Schedule && self.timeout.is_none() {
                violations.push(Violation::ScheduleWithoutTimeout { state, event });
            }
        }

        if let Some(timeout) = &self.timeout {
            for state in &timeout.active_in {
                if state.is_terminal() || *state == initial {
                    violations.push(Violation::TimeoutInInactiveState {
                        state: state.as_str(),
                    });
                } else if !self
                    .rules
                    .iter()
                    .any(|r| r.from == *state && r.event == timeout.event)
                {
                    violations.push(Violation::MissingTimeoutRule {
                        state: state.as_str(),
                    });
                }
            }

            for rule in self.rules.iter().filter(|r| r.event == timeout.event) {
                let state = rule.from.as_str();
                if !timeout.active_in.contains(&rule.from) {
                    violations.push(Violation::TimeoutRuleWhileInactive { state });
                }
                let stays_active = rule.targets().iter().any(|t| !t.is_terminal());
                if stays_active && rule.timeout != TimeoutEffect::Schedule {
                    violations.push(Violation::TimeoutRuleMustRearm { state });
                }
            }
        }

        for state in S::State::active() {
            if !self.rules.iter().any(|r| r.from == state) {
                violations.push(Violation::DeadEnd {
                    state: state.as_str(),
                });
            }
        }

        let reachable = self.reachable();
        for state in S::State::all() {
            if !reachable.contains(state) {
                violations.push(Violation::Unreachable {
                    state: state.as_str(),
                });
            }
        }

        violations
    }

    fn reachable(&self) -> HashSet<S::State> {
        let mut reachable = HashSet::from([S::State::initial()]);
        let mut queue = VecDeque::from([S::State::initial()]);

        while let Some(state) = queue.pop_front() {
            for rule in self.rules.iter().filter(|r| r.from == state) {
                for target in rule.targets() {
                    if reachable.insert(target) {
                        queue.push_back(target);
                    }
                }
            }
        }

        reachable
    }
}

/// A single problem found while validating a transition table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("no start event registered")]
    MissingStartEvent,

    #[error("start event {event} has no rule in the initial state")]
    StartNotHandled { event: &'static str },

    #[error("more than one rule for ({state}, {event})")]
    DuplicateRule {
        state: &'static str,
        event: &'static str,
    },

    #[error("rule ({state}, {event}) uses an unregistered event")]
    UnregisteredEvent {
        state: &'static str,
        event: &'static str,
    },

    #[error("terminal state {state} has a rule for {event}")]
    TerminalHasRule {
        state: &'static str,
        event: &'static str,
    },

    #[error("initial state handles {event}, which is not the start event")]
    InitialHandlesOnlyStart { event: &'static str },

    #[error("rule ({state}, {event}) declares no target")]
    EmptyBranch {
        state: &'static str,
        event: &'static str,
    },

    #[error("rule ({state}, {event}) schedules a timeout but none is defined")]
    ScheduleWithoutTimeout {
        state: &'static str,
        event: &'static str,
    },

    #[error("timeout declared active in {state}, which is initial or terminal")]
    TimeoutInInactiveState { state: &'static str },

    #[error("timeout is active in {state} but has no rule there")]
    MissingTimeoutRule { state: &'static str },

    #[error("timeout rule in {state}, where the timeout is not active")]
    TimeoutRuleWhileInactive { state: &'static str },

    #[error("timeout rule in {state} can stay non-terminal without re-arming")]
    TimeoutRuleMustRearm { state: &'static str },

    #[error("no state is terminal")]
    NoTerminalState,

    #[error("state {state} has no way out")]
    DeadEnd { state: &'static str },

    #[error("state {state} is unreachable from the initial state")]
    Unreachable { state: &'static str },
}

/// A transition table failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {saga_type} definition: {}", join(.violations))]
pub struct DefinitionError {
    pub saga_type: &'static str,
    pub violations: Vec<Violation>,
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
