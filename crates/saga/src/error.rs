//! Saga error types.

use common::CorrelationId;
use saga_store::StoreError;
use thiserror::Error;

use crate::definition::DefinitionError;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The message carries no usable correlation ID, or no workflow
    /// declares its type.
    #[error("Unroutable message '{message_type}': {reason}")]
    Unroutable {
        message_type: String,
        reason: String,
    },

    /// The message type is known but its body could not be decoded.
    #[error("Malformed message '{message_type}': {source}")]
    MalformedMessage {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// The stored instance kept changing underneath every retry.
    #[error("Saga {correlation_id}: persist conflict not resolved after {attempts} attempts")]
    ConflictRetriesExhausted {
        correlation_id: CorrelationId,
        attempts: u32,
    },

    /// A branching rule chose a target it did not declare.
    #[error("Rule ({state}, {event}) chose undeclared target {target}")]
    UndeclaredTarget {
        state: &'static str,
        event: &'static str,
        target: &'static str,
    },

    /// A stored record does not belong to the workflow that loaded it.
    #[error("Saga {correlation_id} is a {actual} instance, not {expected}")]
    SagaTypeMismatch {
        correlation_id: CorrelationId,
        expected: &'static str,
        actual: String,
    },

    /// A stored record is in a state the workflow does not define.
    #[error("Saga {correlation_id} is in unknown state '{state}'")]
    UnknownState {
        correlation_id: CorrelationId,
        state: String,
    },

    /// Two workflows declare the same message type.
    #[error("Message type '{message_type}' is already routed to {saga_type}")]
    DuplicateRoute {
        message_type: &'static str,
        saga_type: &'static str,
    },

    /// Publishing an outbound message failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// The workflow definition failed validation.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// Saga store error.
    #[error("Saga store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if redelivering the same message can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SagaError::Unroutable { .. }
                | SagaError::MalformedMessage { .. }
                | SagaError::UndeclaredTarget { .. }
                | SagaError::SagaTypeMismatch { .. }
                | SagaError::UnknownState { .. }
        )
    }

    /// Returns true if this error is an optimistic-concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SagaError::Store(e) if e.is_conflict())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
