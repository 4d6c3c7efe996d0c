//! Contiguous key-range partitioning of worker threads
//!
//! Every table holds `num_items` keys. Thread `t` owns the keys
//! `t * delta .. (t + 1) * delta` where `delta = ceil(num_items / threads)`;
//! the last thread takes whatever remains. The mapping is a pure function of
//! the key and never changes for the life of the process.

use crate::error::{PrimitiveError, PrimitiveResult};
use crate::key::PrimaryKey;
use crate::ThreadId;
use std::ops::Range;

/// Key-range partitioner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Partitioner {
    threads: usize,
    num_items: u64,
    delta: u64,
}

impl Partitioner {
    /// Create a partitioner for `threads` workers over `num_items` keys
    pub fn new(threads: usize, num_items: u64) -> PrimitiveResult<Self> {
        if threads == 0 || num_items == 0 {
            return Err(PrimitiveError::InvalidPartition { threads, num_items });
        }
        let delta = num_items.div_ceil(threads as u64);
        Ok(Self {
            threads,
            num_items,
            delta,
        })
    }

    /// Number of worker threads
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Keys per table
    pub fn num_items(&self) -> u64 {
        self.num_items
    }

    /// Width of one key range
    pub fn delta(&self) -> u64 {
        self.delta
    }

    /// Thread owning `key`
    pub fn owner(&self, key: PrimaryKey) -> PrimitiveResult<ThreadId> {
        if key.0 >= self.num_items {
            return Err(PrimitiveError::KeyOutOfRange {
                key: key.0,
                num_items: self.num_items,
            });
        }
        let owner = (key.0 / self.delta) as usize;
        Ok(owner.min(self.threads - 1))
    }

    /// Keys owned by `thread`
    ///
    /// Threads past the last populated range get an empty range.
    pub fn range(&self, thread: ThreadId) -> Range<u64> {
        let start = (thread as u64 * self.delta).min(self.num_items);
        let end = if thread + 1 == self.threads {
            self.num_items
        } else {
            ((thread as u64 + 1) * self.delta).min(self.num_items)
        };
        start..end
    }
}
