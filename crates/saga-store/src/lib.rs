//! Durable storage for saga instances.
//!
//! Provides the instance store with optimistic concurrency, the
//! transactional outbox written alongside each transition, and the durable
//! timeout scheduler. Each concern has an in-memory and a PostgreSQL
//! implementation with identical semantics.

pub mod error;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;
pub mod timeout;

pub use common::CorrelationId;
pub use error::{Result, StoreError};
pub use memory::InMemorySagaStore;
pub use outbox::{OutboxMessage, OutboxMessageId};
pub use postgres::PostgresSagaStore;
pub use query::InstanceQuery;
pub use record::{SagaRecord, Version};
pub use store::{Commit, SagaStore, SagaStoreExt, TimeoutScheduler, validate_commit};
pub use timeout::{ScheduledTimeout, TimeoutChange, TimeoutToken};
