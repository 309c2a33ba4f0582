//! Integration tests for the Buy Now workflow.
//!
//! These drive the saga through the orchestrator, the router, the timeout
//! poller and the outbox relay over the in-memory store.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{CorrelationId, Money};
use saga::{
    EngineConfig, IgnoreReason, InMemoryPublisher, InboundMessage, MessageRouter, OutboxRelay,
    SagaOrchestrator, SagaState, TimeoutPoller,
};
use saga_store::InMemorySagaStore;
use uuid::Uuid;
use workflows::buy_now::*;
use workflows::milestones;

struct Harness {
    store: InMemorySagaStore,
    saga: SagaOrchestrator<BuyNowSaga, InMemorySagaStore>,
    router: Arc<MessageRouter>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    fn with_config(config: EngineConfig) -> Self {
        let store = InMemorySagaStore::new();
        let saga = SagaOrchestrator::new(store.clone(), config.clone()).unwrap();
        let router = Arc::new(workflows::router(store.clone(), &config).unwrap());
        Self {
            store,
            saga,
            router,
        }
    }

    async fn state(&self, id: CorrelationId) -> BuyNowState {
        self.saga.get(id).await.unwrap().unwrap().state()
    }

    async fn commands(&self, id: CorrelationId) -> Vec<BuyNowCommand> {
        self.store
            .outbox_for(id)
            .await
            .into_iter()
            .map(|m| serde_json::from_value(m.payload).unwrap())
            .collect()
    }

    async fn command_types(&self, id: CorrelationId) -> Vec<String> {
        self.store
            .outbox_for(id)
            .await
            .into_iter()
            .map(|m| m.message_type)
            .collect()
    }

    /// Fires every timeout that would be due after the Buy Now deadline.
    async fn fire_timeouts(&self) -> usize {
        let poller = TimeoutPoller::new(self.store.clone(), self.router.clone(), 10);
        let later = Utc::now() + Duration::minutes(BUY_NOW_TIMEOUT_MINUTES + 1);
        poller.fire_due(later).await.unwrap()
    }

    async fn start(&self, id: CorrelationId) {
        self.saga.process(started(id)).await.unwrap();
    }

    async fn reserve(&self, id: CorrelationId) {
        self.saga
            .process(BuyNowEvent::AuctionReservedForBuyNow(AuctionReservedData {
                correlation_id: id,
                seller_id: Uuid::new_v4(),
                seller_username: "seller".to_string(),
                price: Money::from_units(500),
                item_title: "Vintage camera".to_string(),
            }))
            .await
            .unwrap();
    }

    async fn create_order(&self, id: CorrelationId, order_id: Uuid) {
        self.saga
            .process(BuyNowEvent::BuyNowOrderCreated(OrderCreatedData {
                correlation_id: id,
                order_id,
            }))
            .await
            .unwrap();
    }
}

fn started(id: CorrelationId) -> BuyNowEvent {
    BuyNowEvent::BuyNowSagaStarted(BuyNowSagaStartedData {
        correlation_id: id,
        auction_id: Uuid::new_v4(),
        buyer_id: Uuid::new_v4(),
        buyer_username: "buyer".to_string(),
        seller_id: Uuid::new_v4(),
        seller_username: "seller".to_string(),
        price: Money::from_units(500),
        item_title: "Vintage camera".to_string(),
        started_at: Utc::now(),
    })
}

fn failure(id: CorrelationId, reason: &str) -> FailureData {
    FailureData {
        correlation_id: id,
        reason: reason.to_string(),
    }
}

fn last_completion(commands: &[BuyNowCommand]) -> &BuyNowSagaCompleted {
    match commands.last() {
        Some(BuyNowCommand::BuyNowSagaCompleted(c)) => c,
        other => panic!("expected a completion, got {other:?}"),
    }
}

mod happy_path {
    use super::*;

    #[tokio::test]
    async fn start_reserves_the_auction_and_arms_the_timeout() {
        let h = Harness::new();
        let id = CorrelationId::new();

        let outcome = h.saga.process(started(id)).await.unwrap();
        assert!(outcome.is_transitioned());

        assert_eq!(h.state(id).await, BuyNowState::ReservingAuction);
        let commands = h.commands(id).await;
        assert!(matches!(
            commands.as_slice(),
            [BuyNowCommand::ReserveAuctionForBuyNow(c)] if c.buyer_username == "buyer"
        ));

        let timeouts = h.store.timeouts_for(id).await;
        assert_eq!(timeouts.len(), 1);
        let delay = timeouts[0].due_at - Utc::now();
        assert!(delay > Duration::minutes(4) && delay <= Duration::minutes(5));

        let instance = h.saga.get(id).await.unwrap().unwrap();
        assert_eq!(instance.pending_timeout(), Some(timeouts[0].token));
    }

    #[tokio::test]
    async fn order_then_completion_finishes_the_purchase() {
        let h = Harness::new();
        let id = CorrelationId::new();
        let order_id = Uuid::new_v4();

        h.start(id).await;
        h.reserve(id).await;
        assert_eq!(h.state(id).await, BuyNowState::CreatingOrder);

        h.create_order(id, order_id).await;
        assert_eq!(h.state(id).await, BuyNowState::CompletingAuction);
        assert!(matches!(
            h.commands(id).await.last(),
            Some(BuyNowCommand::CompleteBuyNowAuction(c)) if c.order_id == order_id
        ));

        h.saga
            .process(BuyNowEvent::BuyNowAuctionCompleted(AuctionCompletedData {
                correlation_id: id,
                completed_at: Utc::now(),
            }))
            .await
            .unwrap();

        assert_eq!(h.state(id).await, BuyNowState::Completed);
        assert_eq!(h.store.timeout_count().await, 0);

        let commands = h.commands(id).await;
        let completion = last_completion(&commands);
        assert!(completion.success);
        assert_eq!(completion.order_id, Some(order_id));
        assert_eq!(completion.failure_reason, None);

        let instance = h.saga.get(id).await.unwrap().unwrap();
        assert_eq!(instance.pending_timeout(), None);
        assert!(instance.milestone(milestones::RESERVED).is_some());
        assert!(instance.milestone(milestones::COMPLETED).is_some());
    }

    #[tokio::test]
    async fn reservation_replaces_the_claimed_price() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        h.saga
            .process(BuyNowEvent::AuctionReservedForBuyNow(AuctionReservedData {
                correlation_id: id,
                seller_id: Uuid::new_v4(),
                seller_username: "real-seller".to_string(),
                price: Money::from_cents(45_000),
                item_title: "Vintage camera".to_string(),
            }))
            .await
            .unwrap();

        match h.commands(id).await.last() {
            Some(BuyNowCommand::CreateBuyNowOrder(c)) => {
                assert_eq!(c.price, Money::from_cents(45_000));
                assert_eq!(c.seller_username, "real-seller");
            }
            other => panic!("expected CreateBuyNowOrder, got {other:?}"),
        }
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn reservation_failure_fails_without_compensation() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        h.saga
            .process(BuyNowEvent::AuctionReservationFailed(failure(id, "AlreadySold")))
            .await
            .unwrap();

        assert_eq!(h.state(id).await, BuyNowState::Failed);
        assert!(
            !h.command_types(id)
                .await
                .contains(&"ReleaseAuctionReservation".to_string())
        );

        let commands = h.commands(id).await;
        let completion = last_completion(&commands);
        assert!(!completion.success);
        assert_eq!(completion.failure_reason.as_deref(), Some("AlreadySold"));
        assert_eq!(h.store.timeout_count().await, 0);
    }

    #[tokio::test]
    async fn order_failure_releases_the_reservation() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        h.reserve(id).await;
        h.saga
            .process(BuyNowEvent::BuyNowOrderCreationFailed(failure(id, "PaymentDeclined")))
            .await
            .unwrap();

        assert_eq!(h.state(id).await, BuyNowState::Compensating);
        assert!(matches!(
            h.commands(id).await.last(),
            Some(BuyNowCommand::ReleaseAuctionReservation(c)) if c.reason == "PaymentDeclined"
        ));
        assert_eq!(h.store.timeouts_for(id).await.len(), 1);

        h.saga
            .process(BuyNowEvent::AuctionReservationReleased(CorrelatedData {
                correlation_id: id,
            }))
            .await
            .unwrap();

        assert_eq!(h.state(id).await, BuyNowState::Failed);
        let commands = h.commands(id).await;
        let completion = last_completion(&commands);
        assert!(!completion.success);
        assert_eq!(completion.failure_reason.as_deref(), Some("PaymentDeclined"));
        assert_eq!(h.store.timeout_count().await, 0);
    }
}

mod timeouts {
    use super::*;

    #[tokio::test]
    async fn timeout_while_creating_the_order_compensates() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        h.reserve(id).await;
        assert_eq!(h.fire_timeouts().await, 1);

        assert_eq!(h.state(id).await, BuyNowState::Compensating);
        assert!(matches!(
            h.commands(id).await.last(),
            Some(BuyNowCommand::ReleaseAuctionReservation(c)) if c.reason == "timeout"
        ));

        h.saga
            .process(BuyNowEvent::AuctionReservationReleased(CorrelatedData {
                correlation_id: id,
            }))
            .await
            .unwrap();

        assert_eq!(h.state(id).await, BuyNowState::Failed);
        let commands = h.commands(id).await;
        assert!(!last_completion(&commands).success);
        assert_eq!(h.store.timeout_count().await, 0);
    }

    #[tokio::test]
    async fn timeout_while_reserving_fails_directly() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        h.fire_timeouts().await;

        assert_eq!(h.state(id).await, BuyNowState::Failed);
        assert_eq!(
            h.command_types(id).await,
            vec!["ReserveAuctionForBuyNow", "BuyNowSagaCompleted"]
        );
        let commands = h.commands(id).await;
        assert_eq!(
            last_completion(&commands).failure_reason.as_deref(),
            Some(TIMEOUT_REASON)
        );
    }

    #[tokio::test]
    async fn timeout_while_completing_the_auction_releases_it() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        h.reserve(id).await;
        h.create_order(id, Uuid::new_v4()).await;
        h.fire_timeouts().await;

        assert_eq!(h.state(id).await, BuyNowState::Compensating);
        assert!(matches!(
            h.commands(id).await.last(),
            Some(BuyNowCommand::ReleaseAuctionReservation(_))
        ));
    }

    #[tokio::test]
    async fn timeout_without_its_token_is_stale() {
        let h = Harness::new();
        let id = CorrelationId::new();
        h.start(id).await;

        let forged = BuyNowEvent::BuyNowSagaTimedOut(BuyNowTimedOutData {
            correlation_id: id,
            auction_id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            buyer_username: "buyer".to_string(),
            timed_out_at: Utc::now(),
        });
        let outcome = h
            .router
            .route(InboundMessage::encode(&forged).unwrap())
            .await
            .unwrap();

        assert_eq!(outcome.ignored_reason(), Some(IgnoreReason::StaleTimeout));
        assert_eq!(h.state(id).await, BuyNowState::ReservingAuction);
    }

    #[tokio::test]
    async fn superseded_timeout_is_absorbed() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        let first = h.store.timeouts_for(id).await.remove(0);
        h.reserve(id).await;
        h.saga
            .process(BuyNowEvent::BuyNowOrderCreationFailed(failure(id, "Declined")))
            .await
            .unwrap();

        // Compensation re-armed the timer, so the first token is stale now.
        let outcome = h.router.route_timeout(&first).await.unwrap();
        assert_eq!(outcome.ignored_reason(), Some(IgnoreReason::StaleTimeout));
        assert_eq!(h.state(id).await, BuyNowState::Compensating);
    }

    #[tokio::test]
    async fn unconfirmed_release_is_retried_then_escalated() {
        let config = EngineConfig {
            compensation_retry_limit: 2,
            ..EngineConfig::default()
        };
        let h = Harness::with_config(config);
        let id = CorrelationId::new();

        h.start(id).await;
        h.reserve(id).await;
        h.fire_timeouts().await;
        assert_eq!(h.state(id).await, BuyNowState::Compensating);

        h.fire_timeouts().await;
        h.fire_timeouts().await;
        assert_eq!(h.state(id).await, BuyNowState::Compensating);
        let releases = h
            .command_types(id)
            .await
            .iter()
            .filter(|t| *t == "ReleaseAuctionReservation")
            .count();
        assert_eq!(releases, 3);

        h.fire_timeouts().await;
        assert_eq!(h.state(id).await, BuyNowState::Failed);
        assert_eq!(h.store.timeout_count().await, 0);

        let commands = h.commands(id).await;
        let completion = last_completion(&commands);
        assert!(!completion.success);
        assert_eq!(
            completion.failure_reason.as_deref(),
            Some("Compensation unconfirmed: timeout")
        );
    }
}

mod idempotency {
    use super::*;

    #[tokio::test]
    async fn duplicate_start_is_a_no_op() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        let outcome = h.saga.process(started(id)).await.unwrap();

        assert_eq!(outcome.ignored_reason(), Some(IgnoreReason::NoTransition));
        assert_eq!(h.store.outbox_for(id).await.len(), 1);
        assert_eq!(h.store.timeouts_for(id).await.len(), 1);
    }

    #[tokio::test]
    async fn redelivered_reply_does_not_publish_twice() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        h.reserve(id).await;
        h.reserve(id).await;

        let creates = h
            .command_types(id)
            .await
            .iter()
            .filter(|t| *t == "CreateBuyNowOrder")
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn late_messages_after_completion_are_absorbed() {
        let h = Harness::new();
        let id = CorrelationId::new();

        h.start(id).await;
        h.saga
            .process(BuyNowEvent::AuctionReservationFailed(failure(id, "Ended")))
            .await
            .unwrap();
        let version = h.saga.get(id).await.unwrap().unwrap().version();

        let outcome = h
            .saga
            .process(BuyNowEvent::BuyNowOrderCreated(OrderCreatedData {
                correlation_id: id,
                order_id: Uuid::new_v4(),
            }))
            .await
            .unwrap();

        assert_eq!(outcome.ignored_reason(), Some(IgnoreReason::Finalized));
        let instance = h.saga.get(id).await.unwrap().unwrap();
        assert_eq!(instance.version(), version);
        assert!(instance.state().is_terminal());
    }

    #[tokio::test]
    async fn reply_for_unknown_instance_creates_nothing() {
        let h = Harness::new();
        let id = CorrelationId::new();

        let outcome = h
            .saga
            .process(BuyNowEvent::AuctionReservationReleased(CorrelatedData {
                correlation_id: id,
            }))
            .await
            .unwrap();

        assert_eq!(outcome.ignored_reason(), Some(IgnoreReason::UnknownInstance));
        assert_eq!(h.store.instance_count().await, 0);
    }
}

mod relay {
    use super::*;

    #[tokio::test]
    async fn relay_publishes_commands_in_commit_order() {
        let h = Harness::new();
        let publisher = Arc::new(InMemoryPublisher::new());
        let relay = OutboxRelay::new(h.store.clone(), publisher.clone(), 10);
        let id = CorrelationId::new();

        h.start(id).await;
        h.reserve(id).await;
        h.create_order(id, Uuid::new_v4()).await;
        relay.drain().await.unwrap();

        assert_eq!(
            publisher.published_types().await,
            vec![
                "ReserveAuctionForBuyNow",
                "CreateBuyNowOrder",
                "CompleteBuyNowAuction"
            ]
        );
        assert_eq!(relay.drain().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_publish_is_retried_on_the_next_pass() {
        let h = Harness::new();
        let publisher = Arc::new(InMemoryPublisher::new());
        let relay = OutboxRelay::new(h.store.clone(), publisher.clone(), 10);
        let id = CorrelationId::new();

        h.start(id).await;
        publisher.set_fail_on_publish(true).await;
        assert_eq!(relay.drain().await.unwrap(), 0);

        publisher.set_fail_on_publish(false).await;
        assert_eq!(relay.drain().await.unwrap(), 1);
        assert_eq!(h.store.dispatched_count().await, 1);
    }
}
