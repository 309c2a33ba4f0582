//! Buy Now transition table.

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
use super::state::BuyNowState;
use crate::compensation;
use crate::milestones;

/// Minutes the purchase may take end to end, and each compensation
/// attempt may wait for its confirmation.
pub const BUY_NOW_TIMEOUT_MINUTES: i64 = 5;

/// Reason recorded when a step does not answer in time.
pub const TIMEOUT_REASON: &str = "timeout";

/// Business fields carried by a Buy Now instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuyNowData {
    pub auction_id: Uuid,
    pub buyer_id: Uuid,
    pub buyer_username: String,
    pub seller_id: Uuid,
    pub seller_username: String,
    pub price: Money,
    pub item_title: String,
    pub order_id: Option<Uuid>,
    /// How many times the release was re-issued after its first attempt.
    #[serde(default)]
    pub release_attempts: u32,
}

/// The Buy Now workflow: reserve the auction, create the order, mark the
/// auction sold. A failure after the reservation releases it again.
#[derive(Debug, Clone, Copy)]
pub struct BuyNowSaga;

impl Saga for BuyNowSaga {
    type State = BuyNowState;
    type Data = BuyNowData;
    type Event = BuyNowEvent;
    type Command = BuyNowCommand;

    fn saga_type() -> &'static str {
        "BuyNow"
    }

    fn definition() -> Result<SagaDefinition<Self>, DefinitionError> {
        use BuyNowState::*;

        SagaDefinition::builder()
            .start_with(BUY_NOW_SAGA_STARTED)
            .events(&[
                AUCTION_RESERVED_FOR_BUY_NOW,
                AUCTION_RESERVATION_FAILED,
                BUY_NOW_ORDER_CREATED,
                BUY_NOW_ORDER_CREATION_FAILED,
                BUY_NOW_AUCTION_COMPLETED,
                AUCTION_RESERVATION_RELEASED,
            ])
            .timeout(
                TimeoutSpec::new(
                    chrono::Duration::minutes(BUY_NOW_TIMEOUT_MINUTES),
                    BUY_NOW_SAGA_TIMED_OUT,
                    timeout_message,
                )
                .active_in(&[ReservingAuction, CreatingOrder, CompletingAuction, Compensating]),
            )
            // Initial
            .rule(
                TransitionRule::on(Initial, BUY_NOW_SAGA_STARTED)
                    .goto(ReservingAuction, start)
                    .schedule_timeout(),
            )
            // ReservingAuction
            .rule(
                TransitionRule::on(ReservingAuction, AUCTION_RESERVED_FOR_BUY_NOW)
                    .goto(CreatingOrder, auction_reserved),
            )
            .rule(
                TransitionRule::on(ReservingAuction, AUCTION_RESERVATION_FAILED)
                    .goto(Failed, reservation_failed),
            )
            .rule(
                TransitionRule::on(ReservingAuction, BUY_NOW_SAGA_TIMED_OUT)
                    .goto(Failed, reservation_timed_out),
            )
            // CreatingOrder
            .rule(
                TransitionRule::on(CreatingOrder, BUY_NOW_ORDER_CREATED)
                    .goto(CompletingAuction, order_created),
            )
            .rule(
                TransitionRule::on(CreatingOrder, BUY_NOW_ORDER_CREATION_FAILED)
                    .goto(Compensating, order_creation_failed)
                    .schedule_timeout(),
            )
            .rule(
                TransitionRule::on(CreatingOrder, BUY_NOW_SAGA_TIMED_OUT)
                    .goto(Compensating, release_on_timeout)
                    .schedule_timeout(),
            )
            // CompletingAuction
            .rule(
                TransitionRule::on(CompletingAuction, BUY_NOW_AUCTION_COMPLETED)
                    .goto(Completed, auction_completed),
            )
            .rule(
                TransitionRule::on(CompletingAuction, BUY_NOW_SAGA_TIMED_OUT)
                    .goto(Compensating, release_on_timeout)
                    .schedule_timeout(),
            )
            // Compensating
            .rule(
                TransitionRule::on(Compensating, AUCTION_RESERVATION_RELEASED)
                    .goto(Failed, reservation_released),
            )
            .rule(
                TransitionRule::on(Compensating, BUY_NOW_SAGA_TIMED_OUT)
                    .branch(&[Compensating, Failed], retry_release)
                    .schedule_timeout(),
            )
            .build()
    }
}

type Ctx<'a> = TransitionContext<'a, BuyNowSaga>;

fn timeout_message(instance: &SagaInstance<BuyNowSaga>, due_at: DateTime<Utc>) -> BuyNowEvent {
    let data = instance.data();
    BuyNowEvent::BuyNowSagaTimedOut(BuyNowTimedOutData {
        correlation_id: instance.correlation_id(),
        auction_id: data.auction_id,
        buyer_id: data.buyer_id,
        buyer_username: data.buyer_username.clone(),
        timed_out_at: due_at,
    })
}

fn start(ctx: &mut Ctx<'_>, event: &BuyNowEvent) {
    let BuyNowEvent::BuyNowSagaStarted(e) = event else {
        return;
    };

    *ctx.data_mut() = BuyNowData {
        auction_id: e.auction_id,
        buyer_id: e.buyer_id,
        buyer_username: e.buyer_username.clone(),
        seller_id: e.seller_id,
        seller_username: e.seller_username.clone(),
        price: e.price,
        item_title: e.item_title.clone(),
        order_id: None,
        release_attempts: 0,
    };

    ctx.publish(BuyNowCommand::ReserveAuctionForBuyNow(ReserveAuctionForBuyNow {
        correlation_id: ctx.correlation_id(),
        auction_id: e.auction_id,
        buyer_id: e.buyer_id,
        buyer_username: e.buyer_username.clone(),
    }));
}

fn auction_reserved(ctx: &mut Ctx<'_>, event: &BuyNowEvent) {
    let BuyNowEvent::AuctionReservedForBuyNow(e) = event else {
        return;
    };

    let data = ctx.data_mut();
    data.seller_id = e.seller_id;
    data.seller_username = e.seller_username.clone();
    data.price = e.price;
    data.item_title = e.item_title.clone();
    ctx.milestone(milestones::RESERVED);

    let data = ctx.data();
    let command = CreateBuyNowOrder {
        correlation_id: ctx.correlation_id(),
        auction_id: data.auction_id,
        buyer_id: data.buyer_id,
        buyer_username: data.buyer_username.clone(),
        seller_id: data.seller_id,
        seller_username: data.seller_username.clone(),
        price: data.price,
        item_title: data.item_title.clone(),
    };
    ctx.publish(BuyNowCommand::CreateBuyNowOrder(command));
}

fn reservation_failed(ctx: &mut Ctx<'_>, event: &BuyNowEvent) {
    if let BuyNowEvent::AuctionReservationFailed(e) = event {
        ctx.fail(e.reason.clone());
    }
    finish(ctx, false);
}

fn reservation_timed_out(ctx: &mut Ctx<'_>, _: &BuyNowEvent) {
    ctx.fail(TIMEOUT_REASON);
    finish(ctx, false);
}

fn order_created(ctx: &mut Ctx<'_>, event: &BuyNowEvent) {
    let BuyNowEvent::BuyNowOrderCreated(e) = event else {
        return;
    };

    ctx.data_mut().order_id = Some(e.order_id);
    ctx.milestone(milestones::ORDER_CREATED);

    let data = ctx.data();
    let command = CompleteBuyNowAuction {
        correlation_id: ctx.correlation_id(),
        auction_id: data.auction_id,
        order_id: e.order_id,
        buyer_id: data.buyer_id,
        buyer_username: data.buyer_username.clone(),
    };
    ctx.publish(BuyNowCommand::CompleteBuyNowAuction(command));
}

fn order_creation_failed(ctx: &mut Ctx<'_>, event: &BuyNowEvent) {
    let reason = match event {
        BuyNowEvent::BuyNowOrderCreationFailed(e) => e.reason.clone(),
        _ => "order creation failed".to_string(),
    };
    begin_release(ctx, reason);
}

fn release_on_timeout(ctx: &mut Ctx<'_>, _: &BuyNowEvent) {
    begin_release(ctx, TIMEOUT_REASON.to_string());
}

fn auction_completed(ctx: &mut Ctx<'_>, _: &BuyNowEvent) {
    finish(ctx, true);
}

fn reservation_released(ctx: &mut Ctx<'_>, _: &BuyNowEvent) {
    ctx.milestone(milestones::COMPENSATED);
    finish(ctx, false);
}

fn retry_release(ctx: &mut Ctx<'_>, _: &BuyNowEvent) -> BuyNowState {
    let limit = ctx.compensation_retry_limit();
    if compensation::try_again(&mut ctx.data_mut().release_attempts, limit) {
        let reason = ctx.failure_reason().unwrap_or(TIMEOUT_REASON).to_string();
        publish_release(ctx, reason);
        return BuyNowState::Compensating;
    }

    let reason = compensation::unconfirmed_reason(ctx.failure_reason());
    ctx.fail(reason);
    ctx.escalate();
    finish(ctx, false);
    BuyNowState::Failed
}

fn begin_release(ctx: &mut Ctx<'_>, reason: String) {
    ctx.fail(reason.clone());
    ctx.milestone(milestones::COMPENSATION_STARTED);
    publish_release(ctx, reason);
}

fn publish_release(ctx: &mut Ctx<'_>, reason: String) {
    let command = ReleaseAuctionReservation {
        correlation_id: ctx.correlation_id(),
        auction_id: ctx.data().auction_id,
        reason,
    };
    ctx.publish(BuyNowCommand::ReleaseAuctionReservation(command));
}

fn finish(ctx: &mut Ctx<'_>, success: bool) {
    ctx.milestone(if success {
        milestones::COMPLETED
    } else {
        milestones::FAILED
    });

    let data = ctx.data();
    let command = BuyNowSagaCompleted {
        correlation_id: ctx.correlation_id(),
        auction_id: data.auction_id,
        order_id: data.order_id,
        success,
        failure_reason: ctx.failure_reason().map(str::to_string),
        completed_at: ctx.now(),
    };
    ctx.publish(BuyNowCommand::BuyNowSagaCompleted(command));
}
