//! The Auction Completion saga: settlement of an auction that ended.

mod commands;
mod events;
mod saga;
mod state;

pub use commands::{
    AuctionCompletionCommand, AuctionCompletionSagaCompleted, CreateAuctionOrder,
    RevertAuctionCompletion, SendAuctionNotifications,
};
pub use events::{
    AUCTION_COMPLETION_REVERTED, AUCTION_COMPLETION_SAGA_STARTED,
    AUCTION_COMPLETION_SAGA_TIMED_OUT, AUCTION_ORDER_CREATED, AUCTION_ORDER_CREATION_FAILED,
    AuctionCompletionEvent, AuctionCompletionTimedOutData, AuctionEndedData,
    AuctionOrderCreatedData, NOTIFICATIONS_FAILED, NOTIFICATIONS_SENT, NotifiedData,
    StepFailedData,
};
pub use saga::{
    AUCTION_COMPLETION_TIMEOUT_MINUTES, AuctionCompletionData, AuctionCompletionSaga,
    NOTIFICATIONS_PARTIAL_PREFIX,
};
pub use state::AuctionCompletionState;
