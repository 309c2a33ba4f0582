use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CorrelationId;

/// Unique identifier for an outbox message.
///
/// Downstream consumers can use it to deduplicate the at-least-once relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxMessageId(Uuid);

impl OutboxMessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a message ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OutboxMessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An outbound command or event queued by a committed transition.
///
/// Outbox messages are written in the same unit of work as the instance
/// state and relayed afterwards in commit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Unique identifier for this message.
    pub id: OutboxMessageId,

    /// Saga instance that produced the message.
    pub correlation_id: CorrelationId,

    /// Workflow that produced the message.
    pub saga_type: String,

    /// Message type name (e.g. "ReserveAuctionForBuyNow").
    pub message_type: String,

    /// The message body as JSON.
    pub payload: serde_json::Value,

    /// When the owning transition was applied.
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Creates an outbox message from a serializable payload.
    pub fn new<T: Serialize>(
        correlation_id: CorrelationId,
        saga_type: impl Into<String>,
        message_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: OutboxMessageId::new(),
            correlation_id,
            saga_type: saga_type.into(),
            message_type: message_type.into(),
            payload: serde_json::to_value(payload)?,
            created_at: Utc::now(),
        })
    }

    /// Overrides the creation timestamp.
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_serializes_payload() {
        let id = CorrelationId::new();
        let message = OutboxMessage::new(
            id,
            "BuyNow",
            "ReserveAuctionForBuyNow",
            &serde_json::json!({"auction_id": "A1"}),
        )
        .unwrap();

        assert_eq!(message.correlation_id, id);
        assert_eq!(message.message_type, "ReserveAuctionForBuyNow");
        assert_eq!(message.payload["auction_id"], "A1");
    }

    #[test]
    fn message_ids_are_unique() {
        assert_ne!(OutboxMessageId::new(), OutboxMessageId::new());
    }
}
