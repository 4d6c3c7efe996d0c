//! Cross-thread agreement for level bounds and rollback

use crossbeam::utils::CachePadded;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Barrier;
use tpg_primitives::{Bid, ThreadId};

/// Min/max reduction over one proposal per thread
///
/// Each thread writes only its own slot; the result is read after a
/// barrier. Reusable across rounds as long as every round ends with a
/// barrier before the next proposal.
#[derive(Debug)]
pub struct LevelReduction {
    proposals: Vec<CachePadded<AtomicUsize>>,
    agreed: CachePadded<AtomicUsize>,
}

impl LevelReduction {
    /// Create slots for every thread
    pub fn new(threads: usize) -> Self {
        Self {
            proposals: (0..threads)
                .map(|_| CachePadded::new(AtomicUsize::new(0)))
                .collect(),
            agreed: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Write this thread's proposal
    pub fn propose(&self, thread: ThreadId, level: usize) {
        if let Some(slot) = self.proposals.get(thread) {
            slot.store(level, Ordering::Release);
        }
    }

    /// Smallest proposal
    pub fn min(&self) -> usize {
        self.proposals
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .min()
            .unwrap_or(0)
    }

    /// Largest proposal
    pub fn max(&self) -> usize {
        self.proposals
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .max()
            .unwrap_or(0)
    }

    /// Publish the minimum as the agreed value
    pub fn publish_min(&self) -> usize {
        let min = self.min();
        self.agreed.store(min, Ordering::Release);
        min
    }

    /// Last published value
    pub fn agreed(&self) -> usize {
        self.agreed.load(Ordering::Acquire)
    }

    /// Agree on the minimum proposal; thread 0 publishes and runs `leader`
    ///
    /// Every thread must call this the same number of times.
    pub fn agree_min(
        &self,
        thread: ThreadId,
        level: usize,
        barrier: &Barrier,
        leader: impl FnOnce(),
    ) -> usize {
        self.propose(thread, level);
        barrier.wait();
        if thread == 0 {
            self.publish_min();
            leader();
        }
        barrier.wait();
        self.agreed()
    }

    /// Agree on the maximum proposal
    ///
    /// Every thread must call this the same number of times.
    pub fn agree_max(&self, thread: ThreadId, level: usize, barrier: &Barrier) -> usize {
        self.propose(thread, level);
        barrier.wait();
        let max = self.max();
        barrier.wait();
        max
    }
}

/// Batch ids of transactions that failed this batch
#[derive(Debug, Default)]
pub struct FailureRegistry {
    bids: Mutex<BTreeSet<Bid>>,
}

impl FailureRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed transaction
    pub fn register(&self, bid: Bid) {
        self.bids.lock().insert(bid);
    }

    /// Copy of the failed set
    pub fn snapshot(&self) -> BTreeSet<Bid> {
        self.bids.lock().clone()
    }

    /// Check if nothing failed
    pub fn is_empty(&self) -> bool {
        self.bids.lock().is_empty()
    }

    /// Forget every failure
    pub fn clear(&self) {
        self.bids.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_agree_min_across_threads() {
        let threads = 4;
        let reduction = Arc::new(LevelReduction::new(threads));
        let barrier = Arc::new(Barrier::new(threads));
        let failures = Arc::new(FailureRegistry::new());
        failures.register(Bid(9));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let reduction = Arc::clone(&reduction);
                let barrier = Arc::clone(&barrier);
                let failures = Arc::clone(&failures);
                thread::spawn(move || {
                    let first = reduction.agree_min(t, 10 + t, &barrier, || failures.clear());
                    let second = reduction.agree_min(t, 20 - t, &barrier, || {});
                    (first, second)
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), (10, 17));
        }
        assert!(failures.is_empty());
    }

    #[test]
    fn test_agree_max_across_threads() {
        let threads = 3;
        let reduction = Arc::new(LevelReduction::new(threads));
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let reduction = Arc::clone(&reduction);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || reduction.agree_max(t, t * 5, &barrier))
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 10);
        }
    }

    #[test]
    fn test_failure_registry_dedups() {
        let failures = FailureRegistry::new();
        failures.register(Bid(3));
        failures.register(Bid(3));
        failures.register(Bid(1));
        let bids: Vec<_> = failures.snapshot().into_iter().collect();
        assert_eq!(bids, vec![Bid(1), Bid(3)]);
    }
}
