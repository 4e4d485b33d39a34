//! Reconnect policy and connection statistics

pub mod policy;
pub mod stats;

pub use policy::{ResilienceManager, RetryDecision};
pub use stats::{StatsSample, StatsSampler};
