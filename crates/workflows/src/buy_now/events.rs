//! Messages the Buy Now saga reacts to.

use chrono::{DateTime, Utc};
use common::{CorrelationId, Money};
use saga::SagaMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const BUY_NOW_SAGA_STARTED: &str = "BuyNowSagaStarted";
pub const AUCTION_RESERVED_FOR_BUY_NOW: &str = "AuctionReservedForBuyNow";
pub const AUCTION_RESERVATION_FAILED: &str = "AuctionReservationFailed";
pub const BUY_NOW_ORDER_CREATED: &str = "BuyNowOrderCreated";
pub const BUY_NOW_ORDER_CREATION_FAILED: &str = "BuyNowOrderCreationFailed";
pub const BUY_NOW_AUCTION_COMPLETED: &str = "BuyNowAuctionCompleted";
pub const AUCTION_RESERVATION_RELEASED: &str = "AuctionReservationReleased";
pub const BUY_NOW_SAGA_TIMED_OUT: &str = "BuyNowSagaTimedOut";

/// Inbound messages of the Buy Now saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BuyNowEvent {
    /// A buyer asked to buy an auction outright.
    BuyNowSagaStarted(BuyNowSagaStartedData),

    /// The auction service took the auction off the market for this buyer.
    AuctionReservedForBuyNow(AuctionReservedData),

    /// The auction could not be reserved (already sold, ended, ...).
    AuctionReservationFailed(FailureData),

    /// The order service created the order.
    BuyNowOrderCreated(OrderCreatedData),

    /// The order service refused to create the order.
    BuyNowOrderCreationFailed(FailureData),

    /// The auction service marked the auction as sold.
    BuyNowAuctionCompleted(AuctionCompletedData),

    /// The auction service put the auction back on the market.
    AuctionReservationReleased(CorrelatedData),

    /// The saga's own deadline passed.
    BuyNowSagaTimedOut(BuyNowTimedOutData),
}

impl SagaMessage for BuyNowEvent {
    fn message_type(&self) -> &'static str {
        match self {
            BuyNowEvent::BuyNowSagaStarted(_) => BUY_NOW_SAGA_STARTED,
            BuyNowEvent::AuctionReservedForBuyNow(_) => AUCTION_RESERVED_FOR_BUY_NOW,
            BuyNowEvent::AuctionReservationFailed(_) => AUCTION_RESERVATION_FAILED,
            BuyNowEvent::BuyNowOrderCreated(_) => BUY_NOW_ORDER_CREATED,
            BuyNowEvent::BuyNowOrderCreationFailed(_) => BUY_NOW_ORDER_CREATION_FAILED,
            BuyNowEvent::BuyNowAuctionCompleted(_) => BUY_NOW_AUCTION_COMPLETED,
            BuyNowEvent::AuctionReservationReleased(_) => AUCTION_RESERVATION_RELEASED,
            BuyNowEvent::BuyNowSagaTimedOut(_) => BUY_NOW_SAGA_TIMED_OUT,
        }
    }

    fn correlation_id(&self) -> CorrelationId {
        match self {
            BuyNowEvent::BuyNowSagaStarted(e) => e.correlation_id,
            BuyNowEvent::AuctionReservedForBuyNow(e) => e.correlation_id,
            BuyNowEvent::AuctionReservationFailed(e) | BuyNowEvent::BuyNowOrderCreationFailed(e) => {
                e.correlation_id
            }
            BuyNowEvent::BuyNowOrderCreated(e) => e.correlation_id,
            BuyNowEvent::BuyNowAuctionCompleted(e) => e.correlation_id,
            BuyNowEvent::AuctionReservationReleased(e) => e.correlation_id,
            BuyNowEvent::BuyNowSagaTimedOut(e) => e.correlation_id,
        }
    }
}

/// Data for BuyNowSagaStarted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyNowSagaStartedData {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub buyer_id: Uuid,
    pub buyer_username: String,
    pub seller_id: Uuid,
    pub seller_username: String,
    /// The buy-now price.
    pub price: Money,
    pub item_title: String,
    pub started_at: DateTime<Utc>,
}

/// Data for AuctionReservedForBuyNow.
///
/// Carries the auction's own view of seller, price and title, which
/// replaces whatever the start message claimed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionReservedData {
    pub correlation_id: CorrelationId,
    pub seller_id: Uuid,
    pub seller_username: String,
    pub price: Money,
    pub item_title: String,
}

/// Data for a step that failed for a business reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureData {
    pub correlation_id: CorrelationId,
    pub reason: String,
}

/// Data for BuyNowOrderCreated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub correlation_id: CorrelationId,
    pub order_id: Uuid,
}

/// Data for BuyNowAuctionCompleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionCompletedData {
    pub correlation_id: CorrelationId,
    pub completed_at: DateTime<Utc>,
}

/// Data for confirmations that carry nothing but the correlation ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedData {
    pub correlation_id: CorrelationId,
}

/// Data for BuyNowSagaTimedOut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyNowTimedOutData {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub buyer_id: Uuid,
    pub buyer_username: String,
    pub timed_out_at: DateTime<Utc>,
}
