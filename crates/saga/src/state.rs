//! Workflow state machines.

use std::fmt::Debug;
use std::hash::Hash;

/// A state in a workflow's lifecycle.
///
/// Workflows implement this on a fieldless enum. Every workflow has exactly
/// one initial pseudostate that an instance occupies only until its start
/// event is applied, and one or more terminal states after which the
/// instance ignores all further messages.
pub trait SagaState: Copy + Eq + Hash + Debug + Send + Sync + 'static {
    /// Every state, in declaration order.
    fn all() -> &'static [Self];

    /// The pseudostate a new instance starts in.
    fn initial() -> Self;

    /// Returns true if no further transitions are allowed.
    fn is_terminal(&self) -> bool;

    /// Returns the state name as stored and logged.
    fn as_str(&self) -> &'static str;

    /// Parses a stored state name.
    fn parse(name: &str) -> Option<Self> {
        Self::all().iter().copied().find(|s| s.as_str() == name)
    }

    /// Non-terminal states other than the initial pseudostate.
    fn active() -> Vec<Self> {
        Self::all()
            .iter()
            .copied()
            .filter(|s| !s.is_terminal() && *s != Self::initial())
            .collect()
    }
}
