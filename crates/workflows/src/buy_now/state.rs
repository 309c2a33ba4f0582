//! Buy Now state machine.

use saga::SagaState;
use serde::{Deserialize, Serialize};

/// The state of a Buy Now saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Initial ──► ReservingAuction ──► CreatingOrder ──► CompletingAuction ──► Completed
///                   │                    │                  │
///                   │                    └────────┬─────────┘
///                   │                             ▼
///                   │                       Compensating ──► Failed
///                   └──────────────────────────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BuyNowState {
    /// Not started yet.
    #[default]
    Initial,

    /// Waiting for the auction service to hold the auction.
    ReservingAuction,

    /// Waiting for the order service.
    CreatingOrder,

    /// Waiting for the auction service to mark the auction sold.
    CompletingAuction,

    /// Waiting for the reservation to be released.
    Compensating,

    /// The purchase went through (terminal state).
    Completed,

    /// The purchase did not go through (terminal state).
    Failed,
}

impl SagaState for BuyNowState {
    fn all() -> &'static [Self] {
        &[
            BuyNowState::Initial,
            BuyNowState::ReservingAuction,
            BuyNowState::CreatingOrder,
            BuyNowState::CompletingAuction,
            BuyNowState::Compensating,
            BuyNowState::Completed,
            BuyNowState::Failed,
        ]
    }

    fn initial() -> Self {
        BuyNowState::Initial
    }

    fn is_terminal(&self) -> bool {
        matches!(self, BuyNowState::Completed | BuyNowState::Failed)
    }

    fn as_str(&self) -> &'static str {
        match self {
            BuyNowState::Initial => "Initial",
            BuyNowState::ReservingAuction => "ReservingAuction",
            BuyNowState::CreatingOrder => "CreatingOrder",
            BuyNowState::CompletingAuction => "CompletingAuction",
            BuyNowState::Compensating => "Compensating",
            BuyNowState::Completed => "Completed",
            BuyNowState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for BuyNowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
