//! Messages the Auction Completion saga publishes.

use chrono::{DateTime, Utc};
use common::{CorrelationId, Money};
use saga::OutboundMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbound messages of the Auction Completion saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuctionCompletionCommand {
    /// Asks the order service to create the winner's order.
    CreateAuctionOrder(CreateAuctionOrder),

    /// Asks the notification service to tell buyer and seller the result.
    SendAuctionNotifications(SendAuctionNotifications),

    /// Compensation: asks the auction service to undo the completion.
    RevertAuctionCompletion(RevertAuctionCompletion),

    /// Final result of the saga.
    AuctionCompletionSagaCompleted(AuctionCompletionSagaCompleted),
}

impl OutboundMessage for AuctionCompletionCommand {
    fn message_type(&self) -> &'static str {
        match self {
            AuctionCompletionCommand::CreateAuctionOrder(_) => "CreateAuctionOrder",
            AuctionCompletionCommand::SendAuctionNotifications(_) => "SendAuctionNotifications",
            AuctionCompletionCommand::RevertAuctionCompletion(_) => "RevertAuctionCompletion",
            AuctionCompletionCommand::AuctionCompletionSagaCompleted(_) => {
                "AuctionCompletionSagaCompleted"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateAuctionOrder {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub buyer_id: Uuid,
    pub buyer_username: String,
    pub seller_id: Uuid,
    pub seller_username: String,
    pub winning_bid: Money,
    pub item_title: String,
}

/// Notification request. Without a winner, `order_id`, `winner_username`
/// and `winning_bid` are absent and the seller is told the item did not
/// sell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendAuctionNotifications {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub order_id: Option<Uuid>,
    pub seller_username: String,
    pub winner_username: Option<String>,
    pub item_title: String,
    pub winning_bid: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevertAuctionCompletion {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionCompletionSagaCompleted {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub order_id: Option<Uuid>,
    pub success: bool,
    pub failure_reason: Option<String>,
    pub completed_at: DateTime<Utc>,
}
