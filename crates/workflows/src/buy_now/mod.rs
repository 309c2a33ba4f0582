//! The Buy Now saga: an outright purchase of an auction.

mod commands;
mod events;
mod saga;
mod state;

pub use commands::{
    BuyNowCommand, BuyNowSagaCompleted, CompleteBuyNowAuction, CreateBuyNowOrder,
    ReleaseAuctionReservation, ReserveAuctionForBuyNow,
};
pub use events::{
    AUCTION_RESERVATION_FAILED, AUCTION_RESERVATION_RELEASED, AUCTION_RESERVED_FOR_BUY_NOW,
    AuctionCompletedData, AuctionReservedData, BUY_NOW_AUCTION_COMPLETED, BUY_NOW_ORDER_CREATED,
    BUY_NOW_ORDER_CREATION_FAILED, BUY_NOW_SAGA_STARTED, BUY_NOW_SAGA_TIMED_OUT, BuyNowEvent,
    BuyNowSagaStartedData, BuyNowTimedOutData, CorrelatedData, FailureData, OrderCreatedData,
};
pub use saga::{BUY_NOW_TIMEOUT_MINUTES, BuyNowData, BuyNowSaga, TIMEOUT_REASON};
pub use state::BuyNowState;
