//! Counter names and the statistics snapshot exposed by the manager

use crate::generation::ContextId;
use hotswap_metrics::{Counter, Spread};

pub const TIMERS_SCHEDULED: &str = "timers.scheduled";
pub const TIMERS_DISPATCHED: &str = "timers.dispatched";
pub const TIMERS_DROPPED_STALE: &str = "timers.dropped_stale";
pub const TIMERS_EXECUTED: &str = "timers.executed";
pub const SWAPS_COMPLETED: &str = "swaps.completed";
pub const SWAPS_FAILED: &str = "swaps.failed";

/// Point-in-time view of a [`ContextManager`](crate::ContextManager).
///
/// All counts read zero when the `metrics` feature is disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    pub current: ContextId,
    pub swaps_completed: u64,
    pub swaps_failed: u64,
    pub timers_scheduled: u64,
    pub timers_dispatched: u64,
    pub timers_dropped_stale: u64,
    pub timers_executed: u64,
    /// Durations of the most recent successful swaps.
    pub swap_times: Spread,
}

impl ManagerStats {
    pub(crate) fn collect(current: ContextId, counter: &Counter, swap_times: Spread) -> Self {
        Self {
            current,
            swaps_completed: counter.get(SWAPS_COMPLETED),
            swaps_failed: counter.get(SWAPS_FAILED),
            timers_scheduled: counter.get(TIMERS_SCHEDULED),
            timers_dispatched: counter.get(TIMERS_DISPATCHED),
            timers_dropped_stale: counter.get(TIMERS_DROPPED_STALE),
            timers_executed: counter.get(TIMERS_EXECUTED),
            swap_times,
        }
    }
}
