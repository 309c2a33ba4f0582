//! Inbound and outbound saga messages.

use common::CorrelationId;
use saga_store::TimeoutToken;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// An event a workflow reacts to.
///
/// Implemented on an enum tagged as `{"type": ..., "data": ...}`
/// (`#[serde(tag = "type", content = "data")]`) so that the variant name is
/// the message type on the wire.
pub trait SagaMessage: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Returns the wire name of this message.
    fn message_type(&self) -> &'static str;

    /// Returns the correlation ID this message is addressed to.
    fn correlation_id(&self) -> CorrelationId;
}

/// A command or notification a workflow publishes.
pub trait OutboundMessage: Serialize + Clone + Debug + Send + Sync + 'static {
    /// Returns the wire name of this message.
    fn message_type(&self) -> &'static str;
}

/// An untyped message as received from a transport or the timeout store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// The wire name of the message.
    #[serde(rename = "type")]
    pub message_type: String,

    /// The message body.
    #[serde(default)]
    pub data: serde_json::Value,

    /// Token of the scheduled timeout this message was delivered from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_token: Option<TimeoutToken>,
}

impl InboundMessage {
    /// Creates an inbound message from a type name and body.
    pub fn new(message_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            timeout_token: None,
        }
    }

    /// Encodes a typed message.
    pub fn encode<M: Serialize>(message: &M) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(message)?)
    }

    /// Attaches the token of the timeout being delivered.
    pub fn with_timeout_token(mut self, token: TimeoutToken) -> Self {
        self.timeout_token = Some(token);
        self
    }

    /// Reads the correlation ID from the body without decoding the message.
    ///
    /// Returns None when the field is missing, unparsable or the nil UUID.
    pub fn correlation_hint(&self) -> Option<CorrelationId> {
        let raw = self.data.get("correlation_id")?.as_str()?;
        CorrelationId::parse(raw)
            .ok()
            .filter(|id| !id.as_uuid().is_nil())
    }

    /// Decodes the message into a workflow's event type.
    pub fn decode<M: SagaMessage>(&self) -> Result<M, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "type": self.message_type,
            "data": self.data,
        }))
    }

    /// Returns the message as `{"type": ..., "data": ...}` JSON.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "type": self.message_type,
            "data": self.data,
        })
    }
}
