//! Shared types for the auction saga engine.

mod money;
mod types;

pub use money::Money;
pub use types::CorrelationId;
