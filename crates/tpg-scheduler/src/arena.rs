//! Operation storage addressed by [`OpId`]

use crate::error::{SchedulerError, SchedulerResult};
use crate::operation::Operation;
use crate::types::OpId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-thread shards of operations
///
/// A thread only appends to and clears its own shard; every thread reads
/// all shards. Handles stay valid until the owning shard is cleared at the
/// end of the batch.
#[derive(Debug)]
pub struct OperationArena {
    shards: Vec<RwLock<Vec<Arc<Operation>>>>,
}

impl OperationArena {
    /// Create an arena with one shard per thread
    pub fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    /// Append an operation built from its future handle
    pub(crate) fn alloc(
        &self,
        shard: usize,
        build: impl FnOnce(OpId) -> Operation,
    ) -> SchedulerResult<Arc<Operation>> {
        let slot = self
            .shards
            .get(shard)
            .ok_or(SchedulerError::ContextNotRegistered(shard))?;
        let mut ops = slot.write();
        if ops.len() >= OpId::MAX_INDEX {
            return Err(SchedulerError::InvalidRequest(format!(
                "thread {} exceeded {} operations in one batch",
                shard,
                OpId::MAX_INDEX
            )));
        }
        let op = Arc::new(build(OpId::new(shard, ops.len())));
        ops.push(Arc::clone(&op));
        Ok(op)
    }

    /// Look up an operation
    pub fn get(&self, id: OpId) -> Option<Arc<Operation>> {
        self.shards
            .get(id.shard())
            .and_then(|shard| shard.read().get(id.index()).cloned())
    }

    /// Operations submitted by one thread, in submission order
    pub fn shard(&self, shard: usize) -> Vec<Arc<Operation>> {
        self.shards
            .get(shard)
            .map(|ops| ops.read().clone())
            .unwrap_or_default()
    }

    pub(crate) fn clear_shard(&self, shard: usize) {
        if let Some(ops) = self.shards.get(shard) {
            ops.write().clear();
        }
    }

    /// Operations across all shards
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Check if the arena holds no operations
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dependency level of an operation: 0 without parents, otherwise one
    /// more than its highest parent
    ///
    /// Memoised on the operations, so each is visited once per batch no
    /// matter how many threads ask. Walks with an explicit stack.
    pub fn dependency_level(&self, root: OpId) -> u32 {
        if let Some(level) = self.get(root).and_then(|op| op.level()) {
            return level;
        }
        let mut cache: HashMap<OpId, u32> = HashMap::new();
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if cache.contains_key(&id) {
                continue;
            }
            let Some(op) = self.get(id) else {
                cache.insert(id, 0);
                continue;
            };
            if let Some(level) = op.level() {
                cache.insert(id, level);
                continue;
            }
            let parents = op.all_parents();
            if expanded {
                let level = parents
                    .iter()
                    .filter_map(|p| cache.get(p))
                    .map(|l| l + 1)
                    .max()
                    .unwrap_or(0);
                op.set_level(level);
                cache.insert(id, level);
            } else {
                stack.push((id, true));
                for parent in parents {
                    if !cache.contains_key(&parent) {
                        stack.push((parent, false));
                    }
                }
            }
        }
        cache.get(&root).copied().unwrap_or(0)
    }
}
