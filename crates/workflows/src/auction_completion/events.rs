//! Messages the Auction Completion saga reacts to.

use chrono::{DateTime, Utc};
use common::{CorrelationId, Money};
use saga::SagaMessage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const AUCTION_COMPLETION_SAGA_STARTED: &str = "AuctionCompletionSagaStarted";
pub const AUCTION_ORDER_CREATED: &str = "AuctionOrderCreated";
pub const AUCTION_ORDER_CREATION_FAILED: &str = "AuctionOrderCreationFailed";
pub const NOTIFICATIONS_SENT: &str = "NotificationsSent";
pub const NOTIFICATIONS_FAILED: &str = "NotificationsFailed";
pub const AUCTION_COMPLETION_REVERTED: &str = "AuctionCompletionReverted";
pub const AUCTION_COMPLETION_SAGA_TIMED_OUT: &str = "AuctionCompletionSagaTimedOut";

/// Inbound messages of the Auction Completion saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuctionCompletionEvent {
    AuctionCompletionSagaStarted(AuctionEndedData),
    AuctionOrderCreated(AuctionOrderCreatedData),
    AuctionOrderCreationFailed(StepFailedData),
    NotificationsSent(NotifiedData),
    NotificationsFailed(StepFailedData),
    AuctionCompletionReverted(NotifiedData),
    AuctionCompletionSagaTimedOut(AuctionCompletionTimedOutData),
}

impl SagaMessage for AuctionCompletionEvent {
    fn message_type(&self) -> &'static str {
        use AuctionCompletionEvent::*;
        match self {
            AuctionCompletionSagaStarted(_) => AUCTION_COMPLETION_SAGA_STARTED,
            AuctionOrderCreated(_) => AUCTION_ORDER_CREATED,
            AuctionOrderCreationFailed(_) => AUCTION_ORDER_CREATION_FAILED,
            NotificationsSent(_) => NOTIFICATIONS_SENT,
            NotificationsFailed(_) => NOTIFICATIONS_FAILED,
            AuctionCompletionReverted(_) => AUCTION_COMPLETION_REVERTED,
            AuctionCompletionSagaTimedOut(_) => AUCTION_COMPLETION_SAGA_TIMED_OUT,
        }
    }

    fn correlation_id(&self) -> CorrelationId {
        use AuctionCompletionEvent::*;
        match self {
            AuctionCompletionSagaStarted(e) => e.correlation_id,
            AuctionOrderCreated(e) => e.correlation_id,
            AuctionOrderCreationFailed(e) | NotificationsFailed(e) => e.correlation_id,
            NotificationsSent(e) | AuctionCompletionReverted(e) => e.correlation_id,
            AuctionCompletionSagaTimedOut(e) => e.correlation_id,
        }
    }
}

/// An auction reached its end time.
///
/// The auction has a winner only when both `winner_id` and `winning_bid`
/// are present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionEndedData {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub seller_id: Uuid,
    pub seller_username: String,
    #[serde(default)]
    pub winner_id: Option<Uuid>,
    #[serde(default)]
    pub winner_username: Option<String>,
    #[serde(default)]
    pub winning_bid: Option<Money>,
    pub item_title: String,
    pub ended_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionOrderCreatedData {
    pub correlation_id: CorrelationId,
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailedData {
    pub correlation_id: CorrelationId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifiedData {
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionCompletionTimedOutData {
    pub correlation_id: CorrelationId,
    pub auction_id: Uuid,
    pub timed_out_at: DateTime<Utc>,
}
