//! Messages the Buy Now saga publishes.

use chrono::{DateTime, Utc};
use common::{CorrelationId, Money};
use saga::OutboundMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbound messages of the Buy Now saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BuyNowCommand {
    /// Asks the auction service to hold the auction for the buyer.
    ReserveAuctionForBuyNow(ReserveAuctionForBuyNow),

    /// Asks the order service to create the order.
    CreateBuyNowOrder(CreateBuyNowOrder),

    /// Asks the auction service to mark the auction as sold.
    CompleteBuyNowAuction(CompleteBuyNowAuction),

    /// Compensation: asks the auction service to undo the reservation.
    ReleaseAuctionReservation(ReleaseAuctionReservation),

    /// Final result of the saga.
    BuyNowSagaCompleted(BuyNowSagaCompleted),
}

impl OutboundMessage for BuyNowCommand {
    fn message_type(&self) -> &'static str {
        match self {
            BuyNowCommand::ReserveAuctionForBuyNow(_) => "ReserveAuctionForBuyNow",
            BuyNowCommand::CreateBuyNowOrder(_) => "CreateBuyNowOrder",
            BuyNowCommand::CompleteBuyNowAuction(_) => "CompleteBuyNowAuction",
            BuyNowCommand::ReleaseAuctionReservation(_) => "ReleaseAuctionReservation",
            BuyNowCommand::BuyNowSagaCompleted(_) => "BuyNowSagaCompleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveAuctionForBuyNow {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub buyer_id: Uuid,
    pub buyer_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBuyNowOrder {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub buyer_id: Uuid,
    pub buyer_username: String,
    pub seller_id: Uuid,
    pub seller_username: String,
    pub price: Money,
    pub item_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteBuyNowAuction {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub order_id: Uuid,
    pub buyer_id: Uuid,
    pub buyer_username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAuctionReservation {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub reason: String,
}

/// Terminal notification. `failure_reason` is set whenever `success` is
/// false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuyNowSagaCompleted {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub order_id: Option<Uuid>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}
