//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency and truncate
//! the tables between tests, so they run serially.
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use saga_store::{
    Commit, CorrelationId, InstanceQuery, OutboxMessage, PostgresSagaStore, SagaRecord,
    SagaStore, SagaStoreExt, ScheduledTimeout, StoreError, TimeoutScheduler, Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!("../../../migrations/001_create_saga_tables.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();

            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE saga_instances, saga_outbox, saga_timeouts")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

fn record(correlation_id: CorrelationId, state: &str, version: i64) -> SagaRecord {
    let now = Utc::now();
    let mut milestones = BTreeMap::new();
    milestones.insert("started".to_string(), now);
    SagaRecord {
        correlation_id,
        saga_type: "BuyNow".to_string(),
        state: state.to_string(),
        data: serde_json::json!({"auction_id": "A1", "price": 50000}),
        failure_reason: None,
        pending_timeout: None,
        milestones,
        started_at: now,
        updated_at: now,
        version: Version::new(version),
    }
}

fn message(correlation_id: CorrelationId, message_type: &str) -> OutboxMessage {
    OutboxMessage::new(
        correlation_id,
        "BuyNow",
        message_type,
        &serde_json::json!({"auction_id": "A1"}),
    )
    .unwrap()
}

fn timeout(correlation_id: CorrelationId, minutes: i64) -> ScheduledTimeout {
    ScheduledTimeout::after(
        correlation_id,
        "BuyNow",
        chrono::Duration::minutes(minutes),
        serde_json::json!({"type": "BuyNowSagaTimedOut"}),
        Utc::now(),
    )
}

#[tokio::test]
#[serial]
async fn insert_and_load_instance() {
    let store = get_test_store().await;
    let id = CorrelationId::new();

    let version = store
        .commit(Commit::new(record(id, "ReservingAuction", 1), Version::initial()))
        .await
        .unwrap();
    assert_eq!(version, Version::first());

    let loaded = store.load(id).await.unwrap().unwrap();
    assert_eq!(loaded.state, "ReservingAuction");
    assert_eq!(loaded.data["auction_id"], "A1");
    assert!(loaded.milestones.contains_key("started"));
    assert!(store.instance_exists(id).await.unwrap());
}

#[tokio::test]
#[serial]
async fn missing_instance_loads_as_none() {
    let store = get_test_store().await;
    assert!(store.load(CorrelationId::new()).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn duplicate_insert_conflicts() {
    let store = get_test_store().await;
    let id = CorrelationId::new();
    let commit = Commit::new(record(id, "ReservingAuction", 1), Version::initial());

    store.commit(commit.clone()).await.unwrap();
    let err = store.commit(commit).await.unwrap_err();

    assert!(matches!(
        err,
        StoreError::ConcurrencyConflict { actual, .. } if actual == Version::first()
    ));
}

#[tokio::test]
#[serial]
async fn stale_update_rolls_back_outbox_and_timeouts() {
    let store = get_test_store().await;
    let id = CorrelationId::new();

    store
        .commit(Commit::new(record(id, "ReservingAuction", 1), Version::initial()))
        .await
        .unwrap();
    store
        .commit(Commit::new(record(id, "CreatingOrder", 2), Version::first()))
        .await
        .unwrap();

    let stale = Commit::new(record(id, "Failed", 2), Version::first())
        .publish(message(id, "BuyNowSagaCompleted"))
        .schedule(timeout(id, 5));
    let err = store.commit(stale).await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(store.load(id).await.unwrap().unwrap().state, "CreatingOrder");
    assert!(store.pending_outbox(10).await.unwrap().is_empty());
    assert!(
        store
            .due(Utc::now() + chrono::Duration::hours(1), 10)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
#[serial]
async fn outbox_is_relayed_in_commit_order() {
    let store = get_test_store().await;
    let id = CorrelationId::new();
    let first = message(id, "ReserveAuctionForBuyNow");
    let first_id = first.id;

    store
        .commit(
            Commit::new(record(id, "ReservingAuction", 1), Version::initial())
                .publish(first)
                .publish(message(id, "Audit")),
        )
        .await
        .unwrap();

    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].message_type, "ReserveAuctionForBuyNow");
    assert_eq!(pending[1].message_type, "Audit");

    store.mark_dispatched(first_id).await.unwrap();
    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message_type, "Audit");
}

#[tokio::test]
#[serial]
async fn prune_deletes_only_relayed_rows() {
    let store = get_test_store().await;
    let id = CorrelationId::new();
    let first = message(id, "ReserveAuctionForBuyNow");
    let first_id = first.id;

    store
        .commit(
            Commit::new(record(id, "ReservingAuction", 1), Version::initial())
                .publish(first)
                .publish(message(id, "Audit")),
        )
        .await
        .unwrap();
    store.mark_dispatched(first_id).await.unwrap();

    let kept = store
        .prune_dispatched(Utc::now() - chrono::Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(kept, 0);

    let pruned = store
        .prune_dispatched(Utc::now() + chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(pruned, 1);

    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message_type, "Audit");
}

#[tokio::test]
#[serial]
async fn timeouts_are_armed_and_cancelled_with_the_commit() {
    let store = get_test_store().await;
    let id = CorrelationId::new();
    let armed = timeout(id, 5);
    let token = armed.token;

    let mut first = record(id, "ReservingAuction", 1);
    first.pending_timeout = Some(token);
    store
        .commit(Commit::new(first, Version::initial()).schedule(armed))
        .await
        .unwrap();

    let later = Utc::now() + chrono::Duration::minutes(6);
    let due = store.due(later, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].token, token);
    assert_eq!(
        store.load(id).await.unwrap().unwrap().pending_timeout,
        Some(token)
    );

    store
        .commit(Commit::new(record(id, "Completed", 2), Version::first()).cancel(token))
        .await
        .unwrap();
    assert!(store.due(later, 10).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn standalone_schedule_and_unschedule() {
    let store = get_test_store().await;
    let token = store
        .schedule(timeout(CorrelationId::new(), 1))
        .await
        .unwrap();

    assert!(store.unschedule(token).await.unwrap());
    assert!(!store.unschedule(token).await.unwrap());
}

#[tokio::test]
#[serial]
async fn find_stuck_instances_by_state_and_age() {
    let store = get_test_store().await;
    let now = Utc::now();

    let mut stuck = record(CorrelationId::new(), "CreatingOrder", 1);
    stuck.updated_at = now - chrono::Duration::minutes(30);
    let stuck_id = stuck.correlation_id;
    let fresh = record(CorrelationId::new(), "CreatingOrder", 1);
    let mut finished = record(CorrelationId::new(), "Completed", 1);
    finished.updated_at = now - chrono::Duration::minutes(30);

    for r in [stuck, fresh, finished] {
        store
            .commit(Commit::new(r, Version::initial()))
            .await
            .unwrap();
    }

    let found = store
        .find_stuck(
            "BuyNow",
            vec!["ReservingAuction".into(), "CreatingOrder".into()],
            chrono::Duration::minutes(10),
            now,
        )
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].correlation_id, stuck_id);

    let limited = store
        .query_instances(InstanceQuery::for_saga_type("BuyNow").limit(2))
        .await
        .unwrap();
    assert_eq!(limited.len(), 2);
}
