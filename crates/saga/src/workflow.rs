//! The workflow trait tying states, messages and data together.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

use crate::definition::{DefinitionError, SagaDefinition};
use crate::message::{OutboundMessage, SagaMessage};
use crate::state::SagaState;

/// A long-running workflow driven by a transition table.
///
/// Implemented on a marker type; the orchestrator is generic over it.
pub trait Saga: Sized + Send + Sync + 'static {
    /// The workflow's states.
    type State: SagaState;

    /// Business fields carried by each instance.
    type Data: Clone + Debug + Default + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Messages the workflow reacts to, including its own timeout.
    type Event: SagaMessage;

    /// Messages the workflow publishes.
    type Command: OutboundMessage;

    /// Returns the workflow type name stored with each instance.
    fn saga_type() -> &'static str;

    /// Builds and validates the transition table.
    fn definition() -> Result<SagaDefinition<Self>, DefinitionError>;
}
