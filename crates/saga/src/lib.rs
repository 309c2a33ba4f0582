//! Table-driven saga orchestration.
//!
//! A workflow is declared as a [`SagaDefinition`]: a validated table of
//! `(state, message type) → rule` entries plus an optional timeout. The
//! [`SagaOrchestrator`] applies one rule per message and commits the new
//! instance state, its outbound messages and its timeout changes as a
//! single unit of work.
//!
//! Around the orchestrator:
//! 1. [`MessageRouter`] routes untyped messages to the workflow declaring them
//! 2. [`OutboxRelay`] publishes committed outbound messages in order
//! 3. [`TimeoutPoller`] delivers due timeouts back through the router
//!
//! Every path is safe under redelivery: duplicates, out-of-order messages,
//! stale timeouts and messages for finished instances are absorbed.

pub mod config;
pub mod context;
pub mod definition;
pub mod error;
pub mod instance;
pub mod message;
pub mod orchestrator;
pub mod publisher;
pub mod relay;
pub mod router;
pub mod state;
pub mod timeouts;
pub mod workflow;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use context::TransitionContext;
pub use definition::{
    DefinitionError, SagaDefinition, SagaDefinitionBuilder, TimeoutEffect, TimeoutSpec,
    TransitionRule, Violation,
};
pub use error::{Result, SagaError};
pub use instance::SagaInstance;
pub use message::{InboundMessage, OutboundMessage, SagaMessage};
pub use orchestrator::{IgnoreReason, Outcome, SagaOrchestrator};
pub use publisher::{InMemoryPublisher, MessagePublisher, TracingPublisher};
pub use relay::OutboxRelay;
pub use router::{MessageHandler, MessageRouter};
pub use state::SagaState;
pub use timeouts::TimeoutPoller;
pub use workflow::Saga;
