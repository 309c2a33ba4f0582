//! A small seat-hold workflow used by the engine's unit tests.
//!
//! ```text
//! Initial ──► Holding ──► Issuing ──► Done
//!                │           │
//!                │           └── timeout ──► Releasing ──► Failed
//!                └── rejected / timeout ──► Failed
//! ```

use chrono::{DateTime, Utc};
use common::CorrelationId;
use serde::{Deserialize, Serialize};

use crate::context::TransitionContext;
use crate::definition::{
    DefinitionError, SagaDefinition, SagaDefinitionBuilder, TimeoutSpec, TransitionRule,
};
use crate::instance::SagaInstance;
use crate::message::{OutboundMessage, SagaMessage};
use crate::state::SagaState;
use crate::workflow::Saga;

pub mod events {
    pub const HOLD_REQUESTED: &str = "HoldRequested";
    pub const HELD: &str = "Held";
    pub const HOLD_REJECTED: &str = "HoldRejected";
    pub const ISSUED: &str = "Issued";
    pub const RELEASED: &str = "Released";
    pub const HOLD_TIMED_OUT: &str = "HoldTimedOut";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TicketState {
    Initial,
    Holding,
    Issuing,
    Releasing,
    Done,
    Failed,
}

impl SagaState for TicketState {
    fn all() -> &'static [Self] {
        &[
            TicketState::Initial,
            TicketState::Holding,
            TicketState::Issuing,
            TicketState::Releasing,
            TicketState::Done,
            TicketState::Failed,
        ]
    }

    fn initial() -> Self {
        TicketState::Initial
    }

    fn is_terminal(&self) -> bool {
        matches!(self, TicketState::Done | TicketState::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            TicketState::Initial => "Initial",
            TicketState::Holding => "Holding",
            TicketState::Issuing => "Issuing",
            TicketState::Releasing => "Releasing",
            TicketState::Done => "Done",
            TicketState::Failed => "Failed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketData {
    pub seat: String,
    pub release_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldRequested {
    pub correlation_id: CorrelationId,
    pub seat: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correlated {
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldRejected {
    pub correlation_id: CorrelationId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldTimedOut {
    pub correlation_id: CorrelationId,
    pub timed_out_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TicketEvent {
    HoldRequested(HoldRequested),
    Held(Correlated),
    HoldRejected(HoldRejected),
    Issued(Correlated),
    Released(Correlated),
    HoldTimedOut(HoldTimedOut),
}

impl SagaMessage for TicketEvent {
    fn message_type(&self) -> &'static str {
        match self {
            TicketEvent::HoldRequested(_) => events::HOLD_REQUESTED,
            TicketEvent::Held(_) => events::HELD,
            TicketEvent::HoldRejected(_) => events::HOLD_REJECTED,
            TicketEvent::Issued(_) => events::ISSUED,
            TicketEvent::Released(_) => events::RELEASED,
            TicketEvent::HoldTimedOut(_) => events::HOLD_TIMED_OUT,
        }
    }

    fn correlation_id(&self) -> CorrelationId {
        match self {
            TicketEvent::HoldRequested(e) => e.correlation_id,
            TicketEvent::Held(e) | TicketEvent::Issued(e) | TicketEvent::Released(e) => {
                e.correlation_id
            }
            TicketEvent::HoldRejected(e) => e.correlation_id,
            TicketEvent::HoldTimedOut(e) => e.correlation_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum TicketCommand {
    PlaceHold { seat: String },
    IssueTicket { seat: String },
    ReleaseHold { seat: String, reason: String },
    TicketFinished { success: bool, reason: Option<String> },
}

impl OutboundMessage for TicketCommand {
    fn message_type(&self) -> &'static str {
        match self {
            TicketCommand::PlaceHold { .. } => "PlaceHold",
            TicketCommand::IssueTicket { .. } => "IssueTicket",
            TicketCommand::ReleaseHold { .. } => "ReleaseHold",
            TicketCommand::TicketFinished { .. } => "TicketFinished",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TicketSaga;

impl Saga for TicketSaga {
    type State = TicketState;
    type Data = TicketData;
    type Event = TicketEvent;
    type Command = TicketCommand;

    fn saga_type() -> &'static str {
        "Ticket"
    }

    fn definition() -> Result<SagaDefinition<Self>, DefinitionError> {
        definition_builder().build()
    }
}

pub fn definition_builder() -> SagaDefinitionBuilder<TicketSaga> {
    use TicketState::*;

    SagaDefinition::builder()
        .start_with(events::HOLD_REQUESTED)
        .events(&[
            events::HELD,
            events::HOLD_REJECTED,
            events::ISSUED,
            events::RELEASED,
        ])
        .timeout(
            TimeoutSpec::new(
                chrono::Duration::minutes(1),
                events::HOLD_TIMED_OUT,
                timeout_message,
            )
            .active_in(&[Holding, Issuing, Releasing]),
        )
        .rule(
            TransitionRule::on(Initial, events::HOLD_REQUESTED)
                .goto(Holding, start)
                .schedule_timeout(),
        )
        .rule(TransitionRule::on(Holding, events::HELD).goto(Issuing, held))
        .rule(TransitionRule::on(Holding, events::HOLD_REJECTED).goto(Failed, rejected))
        .rule(TransitionRule::on(Holding, events::HOLD_TIMED_OUT).goto(Failed, timed_out))
        .rule(TransitionRule::on(Issuing, events::ISSUED).goto(Done, issued))
        .rule(
            TransitionRule::on(Issuing, events::HOLD_TIMED_OUT)
                .goto(Releasing, release)
                .schedule_timeout(),
        )
        .rule(TransitionRule::on(Releasing, events::RELEASED).goto(Failed, released))
        .rule(
            TransitionRule::on(Releasing, events::HOLD_TIMED_OUT)
                .branch(&[Releasing, Failed], retry_release)
                .schedule_timeout(),
        )
}

pub fn timeout_message(instance: &SagaInstance<TicketSaga>, due_at: DateTime<Utc>) -> TicketEvent {
    TicketEvent::HoldTimedOut(HoldTimedOut {
        correlation_id: instance.correlation_id(),
        timed_out_at: due_at,
    })
}

pub fn noop(_: &mut TransitionContext<'_, TicketSaga>, _: &TicketEvent) {}

fn seat(ctx: &TransitionContext<'_, TicketSaga>) -> String {
    ctx.data().seat.clone()
}

fn finish(ctx: &mut TransitionContext<'_, TicketSaga>, success: bool) {
    let reason = ctx.failure_reason().map(str::to_string);
    ctx.publish(TicketCommand::TicketFinished { success, reason });
}

fn start(ctx: &mut TransitionContext<'_, TicketSaga>, event: &TicketEvent) {
    let TicketEvent::HoldRequested(e) = event else {
        return;
    };
    ctx.data_mut().seat = e.seat.clone();
    ctx.publish(TicketCommand::PlaceHold {
        seat: e.seat.clone(),
    });
}

fn held(ctx: &mut TransitionContext<'_, TicketSaga>, _: &TicketEvent) {
    ctx.milestone("held");
    let seat = seat(ctx);
    ctx.publish(TicketCommand::IssueTicket { seat });
}

fn rejected(ctx: &mut TransitionContext<'_, TicketSaga>, event: &TicketEvent) {
    if let TicketEvent::HoldRejected(e) = event {
        ctx.fail(e.reason.clone());
    }
    finish(ctx, false);
}

fn timed_out(ctx: &mut TransitionContext<'_, TicketSaga>, _: &TicketEvent) {
    ctx.fail("timeout");
    finish(ctx, false);
}

fn issued(ctx: &mut TransitionContext<'_, TicketSaga>, _: &TicketEvent) {
    finish(ctx, true);
}

fn release(ctx: &mut TransitionContext<'_, TicketSaga>, _: &TicketEvent) {
    ctx.fail("timeout");
    let seat = seat(ctx);
    ctx.publish(TicketCommand::ReleaseHold {
        seat,
        reason: "timeout".to_string(),
    });
}

fn released(ctx: &mut TransitionContext<'_, TicketSaga>, _: &TicketEvent) {
    finish(ctx, false);
}

fn retry_release(ctx: &mut TransitionContext<'_, TicketSaga>, _: &TicketEvent) -> TicketState {
    if ctx.data().release_attempts >= ctx.compensation_retry_limit() {
        ctx.fail("Compensation unconfirmed: release");
        ctx.escalate();
        finish(ctx, false);
        return TicketState::Failed;
    }
    ctx.data_mut().release_attempts += 1;
    let seat = seat(ctx);
    ctx.publish(TicketCommand::ReleaseHold {
        seat,
        reason: "timeout".to_string(),
    });
    TicketState::Releasing
}

pub fn hold_requested(id: CorrelationId) -> TicketEvent {
    TicketEvent::HoldRequested(HoldRequested {
        correlation_id: id,
        seat: "12A".to_string(),
    })
}

pub fn correlated(id: CorrelationId, event: &str) -> TicketEvent {
    let body = Correlated { correlation_id: id };
    match event {
        events::ISSUED => TicketEvent::Issued(body),
        events::RELEASED => TicketEvent::Released(body),
        _ => TicketEvent::Held(body),
    }
}
