mod usage;

pub use usage::{UsageRecord, UsageTracker};
