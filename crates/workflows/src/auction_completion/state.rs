use saga::SagaState;
use serde::{Deserialize, Serialize};

/// The state of an Auction Completion saga.
///
/// ```text
///            ┌──────────────► SendingNotifications ──► Completed
/// Initial ───┤                       ▲
///            └──► CreatingOrder ─────┘
///                      │
///                      ▼
///                 Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AuctionCompletionState {
    #[default]
    Initial,
    CreatingOrder,
    SendingNotifications,
    Compensating,
    Completed,
    Failed,
}

impl SagaState for AuctionCompletionState {
    fn all() -> &'static [Self] {
        use AuctionCompletionState::*;
        &[
            Initial,
            CreatingOrder,
            SendingNotifications,
            Compensating,
            Completed,
            Failed,
        ]
    }

    fn initial() -> Self {
        AuctionCompletionState::Initial
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuctionCompletionState::Completed | AuctionCompletionState::Failed
        )
    }

    fn as_str(&self) -> &'static str {
        use AuctionCompletionState::*;
        match self {
            Initial => "Initial",
            CreatingOrder => "CreatingOrder",
            SendingNotifications => "SendingNotifications",
            Compensating => "Compensating",
            Completed => "Completed",
            Failed => "Failed",
        }
    }
}

impl std::fmt::Display for AuctionCompletionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
