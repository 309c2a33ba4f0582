//! Routing of untyped messages to the workflow that declares them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use saga_store::{SagaRecord, SagaStore, ScheduledTimeout};

use crate::error::{Result, SagaError};
use crate::message::InboundMessage;
use crate::orchestrator::{Outcome, SagaOrchestrator};
use crate::workflow::Saga;

/// A workflow as seen by the router, with its types erased.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Returns the workflow type name.
    fn saga_type(&self) -> &'static str;

    /// Returns every message type the workflow reacts to.
    fn message_types(&self) -> Vec<&'static str>;

    /// Decodes and processes a message.
    async fn handle(&self, message: InboundMessage) -> Result<Outcome>;

    /// Finds non-terminal instances idle for longer than `older_than`.
    async fn find_stuck(&self, older_than: chrono::Duration) -> Result<Vec<SagaRecord>>;
}

#[async_trait]
impl<S: Saga, St: SagaStore> MessageHandler for SagaOrchestrator<S, St> {
    fn saga_type(&self) -> &'static str {
        S::saga_type()
    }

    fn message_types(&self) -> Vec<&'static str> {
        self.definition().message_types()
    }

    async fn handle(&self, message: InboundMessage) -> Result<Outcome> {
        if message.correlation_hint().is_none() {
            return Err(self.unroutable(&message.message_type, "missing correlation id"));
        }

        let event: S::Event =
            message
                .decode()
                .map_err(|source| SagaError::MalformedMessage {
                    message_type: message.message_type.clone(),
                    source,
                })?;

        self.deliver(event, message.timeout_token).await
    }

    async fn find_stuck(&self, older_than: chrono::Duration) -> Result<Vec<SagaRecord>> {
        SagaOrchestrator::find_stuck(self, older_than)
            .await?
            .iter()
            .map(|instance| instance.to_record())
            .collect()
    }
}

/// Dispatches inbound messages and fired timeouts to registered workflows.
#[derive(Clone, Default)]
pub struct MessageRouter {
    handlers: Vec<Arc<dyn MessageHandler>>,
    routes: HashMap<&'static str, usize>,
}

impl MessageRouter {
    /// Creates an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow. Fails if it declares a message type another
    /// workflow already handles.
    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        for message_type in handler.message_types() {
            if let Some(&existing) = self.routes.get(message_type) {
                return Err(SagaError::DuplicateRoute {
                    message_type,
                    saga_type: self.handlers[existing].saga_type(),
                });
            }
        }

        let index = self.handlers.len();
        for message_type in handler.message_types() {
            self.routes.insert(message_type, index);
        }
        tracing::info!(saga_type = handler.saga_type(), "workflow registered");
        self.handlers.push(handler);
        Ok(())
    }

    /// Registers a workflow, builder style.
    pub fn with(mut self, handler: Arc<dyn MessageHandler>) -> Result<Self> {
        self.register(handler)?;
        Ok(self)
    }

    /// Returns the registered workflows.
    pub fn handlers(&self) -> &[Arc<dyn MessageHandler>] {
        &self.handlers
    }

    /// Returns every routable message type, sorted.
    pub fn message_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.routes.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Routes a message by its type.
    #[tracing::instrument(skip(self, message), fields(message_type = %message.message_type))]
    pub async fn route(&self, message: InboundMessage) -> Result<Outcome> {
        let Some(&index) = self.routes.get(message.message_type.as_str()) else {
            tracing::warn!("no workflow handles message type, dropped");
            metrics::counter!("saga_messages_total", "saga_type" => "unknown", "outcome" => "unroutable")
                .increment(1);
            return Err(SagaError::Unroutable {
                message_type: message.message_type,
                reason: "no workflow handles this message type".to_string(),
            });
        };

        self.handlers[index].handle(message).await
    }

    /// Routes a fired timeout to its workflow, carrying its token.
    pub async fn route_timeout(&self, timeout: &ScheduledTimeout) -> Result<Outcome> {
        let handler = self
            .handlers
            .iter()
            .find(|h| h.saga_type() == timeout.saga_type)
            .ok_or_else(|| SagaError::Unroutable {
                message_type: "timeout".to_string(),
                reason: format!("no workflow named {}", timeout.saga_type),
            })?;

        let message: InboundMessage = serde_json::from_value(timeout.payload.clone())
            .map_err(|source| SagaError::MalformedMessage {
                message_type: "timeout".to_string(),
                source,
            })?;

        handler
            .handle(message.with_timeout_token(timeout.token))
            .await
    }

    /// Finds stuck instances across every registered workflow.
    pub async fn find_stuck(&self, older_than: chrono::Duration) -> Result<Vec<SagaRecord>> {
        let mut stuck = Vec::new();
        for handler in &self.handlers {
            stuck.extend(handler.find_stuck(older_than).await?);
        }
        stuck.sort_by_key(|r| r.updated_at);
        Ok(stuck)
    }
}
