//! Auction workflows built on the saga engine.
//!
//! Two sagas are defined here:
//! - [`BuyNowSaga`]: an outright purchase that reserves the auction,
//!   creates the order and marks the auction sold
//! - [`AuctionCompletionSaga`]: the settlement of an auction that ended,
//!   with or without a winner
//!
//! [`router`] wires both into a [`MessageRouter`] over a shared store.

pub mod auction_completion;
pub mod buy_now;
pub mod compensation;
pub mod milestones;

use std::sync::Arc;

use saga::{EngineConfig, MessageRouter, SagaOrchestrator};
use saga_store::SagaStore;

pub use auction_completion::{AuctionCompletionSaga, AuctionCompletionState};
pub use buy_now::{BuyNowSaga, BuyNowState};

/// Builds a router serving every auction workflow.
///
/// Fails if a workflow definition is invalid, so a broken transition table
/// stops the service at startup rather than on the first message.
pub fn router<St>(store: St, config: &EngineConfig) -> saga::Result<MessageRouter>
where
    St: SagaStore + Clone + 'static,
{
    let buy_now = SagaOrchestrator::<BuyNowSaga, _>::new(store.clone(), config.clone())?;
    let completion = SagaOrchestrator::<AuctionCompletionSaga, _>::new(store, config.clone())?;

    MessageRouter::new()
        .with(Arc::new(buy_now))?
        .with(Arc::new(completion))
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga_store::InMemorySagaStore;

    #[test]
    fn both_workflows_register_without_overlap() {
        let router = router(InMemorySagaStore::new(), &EngineConfig::default()).unwrap();
        assert_eq!(router.handlers().len(), 2);
        assert!(router.message_types().contains(&"BuyNowSagaStarted"));
        assert!(router.message_types().contains(&"AuctionCompletionSagaStarted"));
    }
}
