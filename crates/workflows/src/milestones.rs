//! Milestone names recorded on saga instances.

pub const RESERVED: &str = "reserved";
pub const ORDER_CREATED: &str = "order_created";
pub const NOTIFIED: &str = "notified";
pub const COMPENSATION_STARTED: &str = "compensation_started";
pub const COMPENSATED: &str = "compensated";
pub const COMPLETED: &str = "completed";
pub const FAILED: &str = "failed";
