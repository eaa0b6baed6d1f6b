//! Reliability mechanisms.
//!
//! This module provides:
//! - Acknowledgment wait / retry state of a stream
//! - Delivery statistics

mod ack;
mod stats;

pub use ack::{AckState, INFINITE_RETRY, RetryDecision};
pub use stats::ManagerStats;
pub(crate) use stats::Stats;
