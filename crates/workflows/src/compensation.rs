//! Shared handling of unconfirmed compensation.
//!
//! When a compensating command goes unanswered, the workflow re-issues it
//! each time its timeout fires, up to the engine's retry limit. After that
//! it gives up, fails the saga and flags the transition as escalated. The
//! engine raises the operational alert once that transition commits.

/// Prefix of the failure reason recorded on escalation.
pub const UNCONFIRMED_PREFIX: &str = "Compensation unconfirmed";

/// Counts a retry and returns true if the compensating command may be
/// re-issued once more.
pub(crate) fn try_again(attempts: &mut u32, limit: u32) -> bool {
    if *attempts >= limit {
        return false;
    }
    *attempts += 1;
    true
}

/// Builds the failure reason for an escalated saga.
pub(crate) fn unconfirmed_reason(original: Option<&str>) -> String {
    match original {
        Some(reason) => format!("{UNCONFIRMED_PREFIX}: {reason}"),
        None => format!("{UNCONFIRMED_PREFIX}: no confirmation received"),
    }
}
