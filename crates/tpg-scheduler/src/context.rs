//! Per-thread scheduling state

use crate::request::Request;
use crate::types::OpId;
use std::collections::VecDeque;
use tpg_primitives::ThreadId;

/// State owned by one worker thread across a batch
///
/// Obtained from [`Scheduler::register_context`](crate::Scheduler::register_context)
/// and passed back into every scheduler call.
#[derive(Debug)]
pub struct SchedulerContext {
    thread: ThreadId,
    pub(crate) requests: Vec<Request>,
    pub(crate) buckets: Vec<Vec<OpId>>,
    pub(crate) current_level: usize,
    pub(crate) cursor: usize,
    pub(crate) max_level: usize,
    pub(crate) ready: VecDeque<OpId>,
    pub(crate) busy_wait: VecDeque<OpId>,
    pub(crate) scheduled: usize,
    pub(crate) total: usize,
    pub(crate) submitted: usize,
}

impl SchedulerContext {
    pub(crate) fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            requests: Vec::new(),
            buckets: Vec::new(),
            current_level: 0,
            cursor: 0,
            max_level: 0,
            ready: VecDeque::new(),
            busy_wait: VecDeque::new(),
            scheduled: 0,
            total: 0,
            submitted: 0,
        }
    }

    /// Worker thread index
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Level being explored
    pub fn current_level(&self) -> usize {
        self.current_level
    }

    /// Highest level across all threads this batch
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Operations processed or skipped so far
    pub fn scheduled(&self) -> usize {
        self.scheduled
    }

    /// Operations on this thread's chains
    pub fn total(&self) -> usize {
        self.total
    }

    /// Operations this thread submitted since the last reset
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Operations parked until their parents resolve
    pub fn busy_wait_len(&self) -> usize {
        self.busy_wait.len()
    }

    /// Check if a transaction is open
    pub fn in_transaction(&self) -> bool {
        !self.requests.is_empty()
    }

    pub(crate) fn load(&mut self, buckets: Vec<Vec<OpId>>, max_level: usize) {
        self.total = buckets.iter().map(Vec::len).sum();
        self.buckets = buckets;
        if self.buckets.len() <= max_level {
            self.buckets.resize_with(max_level + 1, Vec::new);
        }
        self.max_level = max_level;
        self.current_level = 0;
        self.cursor = 0;
        self.scheduled = 0;
    }

    /// Operations of one level, empty past the last level
    pub(crate) fn bucket(&self, level: usize) -> &[OpId] {
        self.buckets.get(level).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn clear(&mut self) {
        self.requests.clear();
        self.buckets.clear();
        self.current_level = 0;
        self.cursor = 0;
        self.max_level = 0;
        self.ready.clear();
        self.busy_wait.clear();
        self.scheduled = 0;
        self.total = 0;
        self.submitted = 0;
    }
}
