//! Outbound transports for relayed outbox messages.

use std::sync::Arc;

use async_trait::async_trait;
use saga_store::OutboxMessage;
use tokio::sync::RwLock;

use crate::error::SagaError;

/// Delivers an outbox message to the outside world.
///
/// Delivery is at-least-once: a message may be published again if the
/// relay stops between publishing and marking it dispatched.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes a single message.
    async fn publish(&self, message: &OutboxMessage) -> Result<(), SagaError>;
}

#[async_trait]
impl<P: MessagePublisher + ?Sized> MessagePublisher for Arc<P> {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), SagaError> {
        (**self).publish(message).await
    }
}

/// Publisher that writes each message to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPublisher;

#[async_trait]
impl MessagePublisher for TracingPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), SagaError> {
        tracing::info!(
            message_id = %message.id,
            correlation_id = %message.correlation_id,
            saga_type = %message.saga_type,
            message_type = %message.message_type,
            payload = %message.payload,
            "outbound message published"
        );
        Ok(())
    }
}

#[derive(Debug, Default)]
struct InMemoryPublisherState {
    published: Vec<OutboxMessage>,
    fail_on_publish: bool,
}

/// In-memory publisher for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<RwLock<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    /// Creates a new in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to fail every publish call.
    pub async fn set_fail_on_publish(&self, fail: bool) {
        self.state.write().await.fail_on_publish = fail;
    }

    /// Returns every message published so far, in order.
    pub async fn published(&self) -> Vec<OutboxMessage> {
        self.state.read().await.published.clone()
    }

    /// Returns the message types published so far, in order.
    pub async fn published_types(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .published
            .iter()
            .map(|m| m.message_type.clone())
            .collect()
    }

    /// Returns the number of messages published.
    pub async fn published_count(&self) -> usize {
        self.state.read().await.published.len()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), SagaError> {
        let mut state = self.state.write().await;

        if state.fail_on_publish {
            return Err(SagaError::Publish("Broker unavailable".to_string()));
        }

        state.published.push(message.clone());
        Ok(())
    }
}
