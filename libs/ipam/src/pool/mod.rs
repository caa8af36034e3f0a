pub mod monitor;
pub mod scaler;

use crate::store::PoolCounts;

/// Pool pressure as seen by one monitor tick: the store counts joined with
/// the requested count from the cached spec. Derived, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolState {
    pub counts: PoolCounts,
    pub requested: i64,
}

impl PoolState {
    pub fn new(counts: PoolCounts, requested: i64) -> Self {
        Self { counts, requested }
    }

    /// IPs that could be handed to pods right now or after reclamation
    /// completes.
    pub fn current_available(&self) -> i64 {
        self.counts.total - self.counts.assigned - self.counts.pending_release
    }

    /// IPs that will be free once the orchestrator satisfies the current
    /// request.
    pub fn expected_available(&self) -> i64 {
        self.requested - self.counts.assigned
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_derived_availability() {
        let state = PoolState::new(
            PoolCounts {
                total: 64,
                assigned: 46,
                available: 10,
                pending_programming: 0,
                pending_release: 8,
            },
            48,
        );
        assert_eq!(state.current_available(), 10);
        assert_eq!(state.expected_available(), 2);
    }
}
