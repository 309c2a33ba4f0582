//! Auction Completion transition table.

use chrono::{DateTime, Utc};
use common::Money;
use saga::{
    DefinitionError, Saga, SagaDefinition, SagaInstance, TimeoutSpec, TransitionContext,
    TransitionRule,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::*;
use super::events::*;
use super::state::AuctionCompletionState;
use crate::compensation;
use crate::milestones;

/// Minutes allowed for the whole settlement, and for each compensation
/// attempt.
pub const AUCTION_COMPLETION_TIMEOUT_MINUTES: i64 = 10;

/// Prefix of the reason recorded when notifications did not all go out.
pub const NOTIFICATIONS_PARTIAL_PREFIX: &str = "Notifications partially failed";

const TIMEOUT_REASON: &str = "timeout";

/// Business fields carried by an Auction Completion instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionCompletionData {
    pub auction_id: Uuid,
    pub seller_id: Uuid,
    pub seller_username: String,
    pub winner_id: Option<Uuid>,
    pub winner_username: Option<String>,
    pub winning_bid: Option<Money>,
    pub item_title: String,
    pub ended_at: Option<DateTime<Utc>>,
    pub order_id: Option<Uuid>,
    #[serde(default)]
    pub revert_attempts: u32,
}

impl AuctionCompletionData {
    /// Returns the winner and the winning bid, if the auction sold.
    pub fn sale(&self) -> Option<(Uuid, Money)> {
        self.winner_id.zip(self.winning_bid)
    }
}

/// Settles an auction that reached its end: creates the winner's order,
/// then notifies both parties. An auction without a winner skips straight
/// to notifying the seller.
#[derive(Debug, Clone, Copy)]
pub struct AuctionCompletionSaga;

impl Saga for AuctionCompletionSaga {
    type State = AuctionCompletionState;
    type Data = AuctionCompletionData;
    type Event = AuctionCompletionEvent;
    type Command = AuctionCompletionCommand;

    fn saga_type() -> &'static str {
        "AuctionCompletion"
    }

    fn definition() -> Result<SagaDefinition<Self>, DefinitionError> {
        use AuctionCompletionState::*;

        SagaDefinition::builder()
            .start_with(AUCTION_COMPLETION_SAGA_STARTED)
            .events(&[
                AUCTION_ORDER_CREATED,
                AUCTION_ORDER_CREATION_FAILED,
                NOTIFICATIONS_SENT,
                NOTIFICATIONS_FAILED,
                AUCTION_COMPLETION_REVERTED,
            ])
            .timeout(
                TimeoutSpec::new(
                    chrono::Duration::minutes(AUCTION_COMPLETION_TIMEOUT_MINUTES),
                    AUCTION_COMPLETION_SAGA_TIMED_OUT,
                    timeout_message,
                )
                .active_in(&[CreatingOrder, SendingNotifications, Compensating]),
            )
            .rule(
                TransitionRule::on(Initial, AUCTION_COMPLETION_SAGA_STARTED)
                    .branch(&[CreatingOrder, SendingNotifications], start)
                    .schedule_timeout(),
            )
            .rule(
                TransitionRule::on(CreatingOrder, AUCTION_ORDER_CREATED)
                    .goto(SendingNotifications, order_created),
            )
            .rule(
                TransitionRule::on(CreatingOrder, AUCTION_ORDER_CREATION_FAILED)
                    .goto(Compensating, order_creation_failed)
                    .schedule_timeout(),
            )
            .rule(
                TransitionRule::on(CreatingOrder, AUCTION_COMPLETION_SAGA_TIMED_OUT)
                    .goto(Compensating, revert_on_timeout)
                    .schedule_timeout(),
            )
            .rule(
                TransitionRule::on(SendingNotifications, NOTIFICATIONS_SENT)
                    .goto(Completed, notifications_sent),
            )
            .rule(
                TransitionRule::on(SendingNotifications, NOTIFICATIONS_FAILED)
                    .goto(Completed, notifications_failed),
            )
            .rule(
                TransitionRule::on(SendingNotifications, AUCTION_COMPLETION_SAGA_TIMED_OUT)
                    .goto(Completed, notifications_timed_out),
            )
            .rule(
                TransitionRule::on(Compensating, AUCTION_COMPLETION_REVERTED)
                    .goto(Failed, completion_reverted),
            )
            .rule(
                TransitionRule::on(Compensating, AUCTION_COMPLETION_SAGA_TIMED_OUT)
                    .branch(&[Compensating, Failed], retry_revert)
                    .schedule_timeout(),
            )
            .build()
    }
}

type Ctx<'a> = TransitionContext<'a, AuctionCompletionSaga>;

fn timeout_message(
    instance: &SagaInstance<AuctionCompletionSaga>,
    due_at: DateTime<Utc>,
) -> AuctionCompletionEvent {
    AuctionCompletionEvent::AuctionCompletionSagaTimedOut(AuctionCompletionTimedOutData {
        correlation_id: instance.correlation_id(),
        auction_id: instance.data().auction_id,
        timed_out_at: due_at,
    })
}

fn start(ctx: &mut Ctx<'_>, event: &AuctionCompletionEvent) -> AuctionCompletionState {
    if let AuctionCompletionEvent::AuctionCompletionSagaStarted(e) = event {
        *ctx.data_mut() = AuctionCompletionData {
            auction_id: e.auction_id,
            seller_id: e.seller_id,
            seller_username: e.seller_username.clone(),
            winner_id: e.winner_id,
            winner_username: e.winner_username.clone(),
            winning_bid: e.winning_bid,
            item_title: e.item_title.clone(),
            ended_at: Some(e.ended_at),
            order_id: None,
            revert_attempts: 0,
        };
    }

    let data = ctx.data();
    let Some((buyer_id, winning_bid)) = data.sale() else {
        tracing::info!(
            correlation_id = %ctx.correlation_id(),
            auction_id = %data.auction_id,
            "auction ended without a winner"
        );
        publish_notifications(ctx);
        return AuctionCompletionState::SendingNotifications;
    };

    let command = CreateAuctionOrder {
        correlation_id: ctx.correlation_id(),
        auction_id: data.auction_id,
        buyer_id,
        buyer_username: data.winner_username.clone().unwrap_or_default(),
        seller_id: data.seller_id,
        seller_username: data.seller_username.clone(),
        winning_bid,
        item_title: data.item_title.clone(),
    };
    ctx.publish(AuctionCompletionCommand::CreateAuctionOrder(command));
    AuctionCompletionState::CreatingOrder
}

fn order_created(ctx: &mut Ctx<'_>, event: &AuctionCompletionEvent) {
    if let AuctionCompletionEvent::AuctionOrderCreated(e) = event {
        ctx.data_mut().order_id = Some(e.order_id);
    }
    ctx.milestone(milestones::ORDER_CREATED);
    publish_notifications(ctx);
}

fn order_creation_failed(ctx: &mut Ctx<'_>, event: &AuctionCompletionEvent) {
    let reason = match event {
        AuctionCompletionEvent::AuctionOrderCreationFailed(e) => e.reason.clone(),
        _ => "order creation failed".to_string(),
    };
    begin_revert(ctx, reason);
}

fn revert_on_timeout(ctx: &mut Ctx<'_>, _: &AuctionCompletionEvent) {
    begin_revert(ctx, TIMEOUT_REASON.to_string());
}

fn notifications_sent(ctx: &mut Ctx<'_>, _: &AuctionCompletionEvent) {
    ctx.milestone(milestones::NOTIFIED);
    finish(ctx, true);
}

// Notifications are best effort: the sale stands even if they fail.
fn notifications_failed(ctx: &mut Ctx<'_>, event: &AuctionCompletionEvent) {
    let reason = match event {
        AuctionCompletionEvent::NotificationsFailed(e) => e.reason.as_str(),
        _ => "unknown",
    };
    ctx.fail(format!("{NOTIFICATIONS_PARTIAL_PREFIX}: {reason}"));
    finish(ctx, true);
}

fn notifications_timed_out(ctx: &mut Ctx<'_>, _: &AuctionCompletionEvent) {
    ctx.fail(format!("{NOTIFICATIONS_PARTIAL_PREFIX}: {TIMEOUT_REASON}"));
    finish(ctx, true);
}

fn completion_reverted(ctx: &mut Ctx<'_>, _: &AuctionCompletionEvent) {
    ctx.milestone(milestones::COMPENSATED);
    finish(ctx, false);
}

fn retry_revert(ctx: &mut Ctx<'_>, _: &AuctionCompletionEvent) -> AuctionCompletionState {
    let limit = ctx.compensation_retry_limit();
    if compensation::try_again(&mut ctx.data_mut().revert_attempts, limit) {
        let reason = ctx.failure_reason().unwrap_or(TIMEOUT_REASON).to_string();
        publish_revert(ctx, reason);
        return AuctionCompletionState::Compensating;
    }

    let reason = compensation::unconfirmed_reason(ctx.failure_reason());
    ctx.fail(reason);
    ctx.escalate();
    finish(ctx, false);
    AuctionCompletionState::Failed
}

fn begin_revert(ctx: &mut Ctx<'_>, reason: String) {
    ctx.fail(reason.clone());
    ctx.milestone(milestones::COMPENSATION_STARTED);
    publish_revert(ctx, reason);
}

fn publish_revert(ctx: &mut Ctx<'_>, reason: String) {
    let command = RevertAuctionCompletion {
        correlation_id: ctx.correlation_id(),
        auction_id: ctx.data().auction_id,
        reason,
    };
    ctx.publish(AuctionCompletionCommand::RevertAuctionCompletion(command));
}

fn publish_notifications(ctx: &mut Ctx<'_>) {
    let data = ctx.data();
    let command = SendAuctionNotifications {
        correlation_id: ctx.correlation_id(),
        auction_id: data.auction_id,
        order_id: data.order_id,
        seller_username: data.seller_username.clone(),
        winner_username: data.sale().and(data.winner_username.clone()),
        item_title: data.item_title.clone(),
        winning_bid: data.sale().map(|(_, bid)| bid),
    };
    ctx.publish(AuctionCompletionCommand::SendAuctionNotifications(command));
}

fn finish(ctx: &mut Ctx<'_>, success: bool) {
    ctx.milestone(if success {
        milestones::COMPLETED
    } else {
        milestones::FAILED
    });

    let data = ctx.data();
    let command = AuctionCompletionSagaCompleted {
        correlation_id: ctx.correlation_id(),
        auction_id: data.auction_id,
        order_id: data.order_id,
        success,
        failure_reason: ctx.failure_reason().map(str::to_string),
        completed_at: ctx.now(),
    };
    ctx.publish(AuctionCompletionCommand::AuctionCompletionSagaCompleted(command));
}
