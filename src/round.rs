//! The one piece of shared mutable state on the hot path: the highest round
//! observed by any fetcher, used for the skip-ahead optimization.
//!
//! Skip-ahead is a correctness-neutral latency win, never a correctness
//! requirement — the merge/dedup stage filters duplicates regardless of
//! whether any fetcher skipped ahead.

use std::sync::atomic::{AtomicI64, Ordering};

/// Sentinel meaning "no round has been observed yet".
pub const NONE: i64 = -1;

/// Process-wide high-water mark shared by every fetcher and the merge stage.
#[derive(Debug, Default)]
pub struct GlobalMaxRound(AtomicI64);

impl GlobalMaxRound {
    pub fn new() -> Self {
        Self(AtomicI64::new(NONE))
    }

    /// Current value, or `None` if nothing has been published yet.
    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::Acquire) {
            NONE => None,
            n => Some(n as u64),
        }
    }

    /// Publish a new high-water mark. Callers (the merge stage) are
    /// expected to only ever call this with a strictly increasing round;
    /// it is not compare-and-swapped because there is exactly one writer.
    pub fn set(&self, round: u64) {
        self.0.store(round as i64, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let g = GlobalMaxRound::new();
        assert_eq!(g.get(), None);
    }

    #[test]
    fn set_then_get() {
        let g = GlobalMaxRound::new();
        g.set(100);
        assert_eq!(g.get(), Some(100));
        g.set(101);
        assert_eq!(g.get(), Some(101));
    }
}
