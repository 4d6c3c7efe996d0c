//! Logging manager: the durability collaborator of the scheduler

use crate::error::{DurabilityError, DurabilityResult};
use crate::history::HistoryViews;
use crate::persist::LogDirectory;
use crate::placement::TaskPlacing;
use crate::record::{DurabilityMode, LogRecord};
use crate::snapshot::{SnapshotDescriptor, SnapshotStore};
use crate::GroupId;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tpg_primitives::{Bid, RecordKey, ThreadId, Value};
use tpg_storage::StoreSnapshot;
use tracing::{debug, info};

/// Durability collaborator consumed by the scheduler and recovery
pub trait LoggingManager: Send + Sync {
    /// Active durability mode
    fn mode(&self) -> DurabilityMode;

    /// Buffer a record produced by `thread` for the group in flight
    fn add_log_record(&self, thread: ThreadId, record: LogRecord);

    /// Seal the records `thread` buffered as part of `group`
    fn commit_group(&self, thread: ThreadId, group: GroupId) -> DurabilityResult<()>;

    /// Check if history views exist for a group
    fn check_group_id(&self, group: GroupId) -> bool;

    /// Value consumed from `source` by `key`'s operation at `bid`
    fn inspect_dependency_view(
        &self,
        group: GroupId,
        key: RecordKey,
        source: RecordKey,
        bid: Bid,
    ) -> Option<Value>;

    /// Check if the transaction at `bid` aborted in the logged run
    fn inspect_abort_view(&self, bid: Bid) -> bool;

    /// Commit a store snapshot taken after `group`
    fn commit_snapshot(
        &self,
        group: GroupId,
        snapshot: StoreSnapshot,
    ) -> DurabilityResult<SnapshotDescriptor>;

    /// Latest snapshot usable by `thread`, covering at least `since_group`
    fn spout_ask_recovery(
        &self,
        thread: ThreadId,
        since_group: GroupId,
    ) -> DurabilityResult<Option<SnapshotDescriptor>>;

    /// Content of a snapshot
    fn load_snapshot(&self, descriptor: &SnapshotDescriptor) -> DurabilityResult<Arc<StoreSnapshot>>;

    /// Committed groups of `thread` newer than `after`, in group order
    fn spout_redo(
        &self,
        thread: ThreadId,
        after: Option<GroupId>,
    ) -> DurabilityResult<Vec<(GroupId, Vec<LogRecord>)>>;

    /// Check if the logged run reported chain placement for a group
    fn can_inspect_task_placing(&self, group: GroupId) -> bool;

    /// Chains `thread` replays for `group`, from the logged placement
    fn inspect_task_placing(&self, group: GroupId, thread: ThreadId) -> Vec<RecordKey>;

    /// Drop the placement of a group that finished replaying
    fn release_task_placing(&self, group: GroupId);

    /// Highest group committed by every thread
    fn last_committed_group(&self) -> Option<GroupId>;
}

/// Logging manager keeping committed groups in memory, optionally
/// mirrored to a [`LogDirectory`]
pub struct InMemoryLoggingManager {
    mode: DurabilityMode,
    threads: usize,
    pending: Vec<Mutex<Vec<LogRecord>>>,
    committed: Vec<RwLock<BTreeMap<GroupId, Vec<LogRecord>>>>,
    history: HistoryViews,
    snapshots: SnapshotStore,
    placing: TaskPlacing,
    directory: Option<LogDirectory>,
}

impl InMemoryLoggingManager {
    /// Create a manager for `threads` workers
    pub fn new(mode: DurabilityMode, threads: usize) -> Self {
        Self {
            mode,
            threads,
            pending: (0..threads).map(|_| Mutex::new(Vec::new())).collect(),
            committed: (0..threads).map(|_| RwLock::new(BTreeMap::new())).collect(),
            history: HistoryViews::new(),
            snapshots: SnapshotStore::new(),
            placing: TaskPlacing::new(),
            directory: None,
        }
    }

    /// Create a manager mirroring every commit to `dir`
    pub fn with_directory(
        mode: DurabilityMode,
        threads: usize,
        dir: impl AsRef<Path>,
    ) -> DurabilityResult<Self> {
        let mut manager = Self::new(mode, threads);
        manager.directory = Some(LogDirectory::open(dir)?);
        Ok(manager)
    }

    /// Reopen a directory written by a previous run
    ///
    /// Committed groups, snapshots and (in path mode) history views are
    /// loaded back. An unreadable group fails the open; an unreadable
    /// snapshot is skipped.
    pub fn open(mode: DurabilityMode, threads: usize, dir: impl AsRef<Path>) -> DurabilityResult<Self> {
        let manager = Self::with_directory(mode, threads, dir)?;
        if let Some(directory) = &manager.directory {
            for (descriptor, snapshot) in directory.read_snapshots()? {
                manager.snapshots.insert(descriptor, snapshot);
            }
            for thread in directory.threads()? {
                let slot = manager.committed.get(thread).ok_or(DurabilityError::UnknownThread {
                    thread,
                    threads,
                })?;
                let groups = directory.read_thread(thread, None)?;
                let mut committed = slot.write();
                for (group, records) in groups {
                    manager.index_records(&records);
                    committed.insert(group, records);
                }
            }
            if let Some(latest) = manager.snapshots.latest_since(0) {
                manager.placing.forget_through(latest.group);
            }
            info!(
                root = ?directory.root(),
                snapshots = manager.snapshots.len(),
                history = manager.history.len(),
                "Reopened log directory"
            );
        }
        Ok(manager)
    }

    /// History views built from committed path records
    pub fn history(&self) -> &HistoryViews {
        &self.history
    }

    /// Records committed by `thread` in `group`
    pub fn committed_records(&self, thread: ThreadId, group: GroupId) -> Vec<LogRecord> {
        self.committed
            .get(thread)
            .and_then(|c| c.read().get(&group).cloned())
            .unwrap_or_default()
    }

    /// Placement reports still held
    pub fn placing(&self) -> &TaskPlacing {
        &self.placing
    }

    fn index_records(&self, records: &[LogRecord]) {
        for record in records {
            match record {
                LogRecord::History(h) => self.history.add(h),
                LogRecord::Abort { bid } => self.history.add_abort(*bid),
                LogRecord::Placement { group, key, weight } => {
                    self.placing.add_node(*group, *key, *weight)
                }
                _ => {}
            }
        }
    }

    fn check_thread(&self, thread: ThreadId) -> DurabilityResult<()> {
        if thread >= self.threads {
            return Err(DurabilityError::UnknownThread {
                thread,
                threads: self.threads,
            });
        }
        Ok(())
    }
}

impl LoggingManager for InMemoryLoggingManager {
    fn mode(&self) -> DurabilityMode {
        self.mode
    }

    fn add_log_record(&self, thread: ThreadId, record: LogRecord) {
        if let Some(pending) = self.pending.get(thread) {
            pending.lock().push(record);
        }
    }

    fn commit_group(&self, thread: ThreadId, group: GroupId) -> DurabilityResult<()> {
        self.check_thread(thread)?;
        let records = std::mem::take(&mut *self.pending[thread].lock());
        if let Some(directory) = &self.directory {
            directory.write_group(thread, group, &records)?;
        }
        self.index_records(&records);
        debug!(thread, group, records = records.len(), "Committed log group");
        self.committed[thread].write().insert(group, records);
        Ok(())
    }

    fn check_group_id(&self, group: GroupId) -> bool {
        self.history.check_group_id(group)
    }

    fn inspect_dependency_view(
        &self,
        group: GroupId,
        key: RecordKey,
        source: RecordKey,
        bid: Bid,
    ) -> Option<Value> {
        self.history.inspect_dependency_view(group, key, source, bid)
    }

    fn inspect_abort_view(&self, bid: Bid) -> bool {
        self.history.inspect_abort_view(bid)
    }

    fn commit_snapshot(
        &self,
        group: GroupId,
        snapshot: StoreSnapshot,
    ) -> DurabilityResult<SnapshotDescriptor> {
        let descriptor = self.snapshots.commit(group, snapshot);
        if let Some(directory) = &self.directory {
            let snapshot = self.snapshots.load(descriptor.snapshot_id)?;
            directory.write_snapshot(&descriptor, &snapshot)?;
        }
        self.placing.forget_through(group);
        info!(snapshot = descriptor.snapshot_id, group, "Committed snapshot");
        Ok(descriptor)
    }

    fn spout_ask_recovery(
        &self,
        thread: ThreadId,
        since_group: GroupId,
    ) -> DurabilityResult<Option<SnapshotDescriptor>> {
        self.check_thread(thread)?;
        Ok(self.snapshots.latest_since(since_group))
    }

    fn load_snapshot(&self, descriptor: &SnapshotDescriptor) -> DurabilityResult<Arc<StoreSnapshot>> {
        self.snapshots.load(descriptor.snapshot_id)
    }

    fn spout_redo(
        &self,
        thread: ThreadId,
        after: Option<GroupId>,
    ) -> DurabilityResult<Vec<(GroupId, Vec<LogRecord>)>> {
        self.check_thread(thread)?;
        if let Some(directory) = &self.directory {
            return directory.read_thread(thread, after);
        }
        let committed = self.committed[thread].read();
        Ok(committed
            .iter()
            .filter(|(g, _)| after.map_or(true, |a| **g > a))
            .map(|(g, r)| (*g, r.clone()))
            .collect())
    }

    fn can_inspect_task_placing(&self, group: GroupId) -> bool {
        self.placing.contains(group)
    }

    fn inspect_task_placing(&self, group: GroupId, thread: ThreadId) -> Vec<RecordKey> {
        self.placing.assignment(group, thread, self.threads)
    }

    fn release_task_placing(&self, group: GroupId) {
        self.placing.forget(group);
    }

    fn last_committed_group(&self) -> Option<GroupId> {
        self.committed
            .iter()
            .map(|c| c.read().keys().next_back().copied())
            .min()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryRecord;
    use tpg_primitives::{PrimaryKey, TableId};

    fn key(k: u64) -> RecordKey {
        RecordKey::new(TableId(0), PrimaryKey(k))
    }

    #[test]
    fn test_commit_moves_pending_records() {
        let manager = InMemoryLoggingManager::new(DurabilityMode::Wal, 2);
        manager.add_log_record(
            1,
            LogRecord::Wal {
                key: key(3),
                bid: Bid(5),
                value: Value::Long(1),
            },
        );
        manager.commit_group(1, 0).unwrap();
        manager.commit_group(0, 0).unwrap();

        assert_eq!(manager.committed_records(1, 0).len(), 1);
        assert!(manager.committed_records(0, 0).is_empty());
        assert_eq!(manager.last_committed_group(), Some(0));

        let redo = manager.spout_redo(1, None).unwrap();
        assert_eq!(redo.len(), 1);
        assert!(manager.spout_redo(1, Some(0)).unwrap().is_empty());
    }

    #[test]
    fn test_last_committed_group_waits_for_every_thread() {
        let manager = InMemoryLoggingManager::new(DurabilityMode::Command, 2);
        manager.commit_group(0, 4).unwrap();
        assert_eq!(manager.last_committed_group(), None);
        manager.commit_group(1, 4).unwrap();
        assert_eq!(manager.last_committed_group(), Some(4));
    }

    #[test]
    fn test_history_indexed_on_commit() {
        let manager = InMemoryLoggingManager::new(DurabilityMode::Path, 1);
        manager.add_log_record(
            0,
            LogRecord::History(HistoryRecord {
                group: 7,
                key: key(1),
                source: key(0),
                bid: Bid(70),
                value: Value::Long(42),
            }),
        );
        assert!(!manager.check_group_id(7));
        manager.commit_group(0, 7).unwrap();
        assert!(manager.check_group_id(7));
        assert_eq!(
            manager.inspect_dependency_view(7, key(1), key(0), Bid(70)),
            Some(Value::Long(42))
        );
    }

    #[test]
    fn test_placement_indexed_on_commit_and_pruned_by_snapshot() {
        let manager = InMemoryLoggingManager::new(DurabilityMode::Path, 2);
        for group in 0..3 {
            manager.add_log_record(
                0,
                LogRecord::Placement {
                    group,
                    key: key(0),
                    weight: 4,
                },
            );
            manager.add_log_record(
                1,
                LogRecord::Placement {
                    group,
                    key: key(1),
                    weight: 2,
                },
            );
            manager.commit_group(0, group).unwrap();
            manager.commit_group(1, group).unwrap();
        }
        assert!(manager.can_inspect_task_placing(2));
        assert!(!manager.can_inspect_task_placing(3));

        manager.commit_snapshot(1, StoreSnapshot::default()).unwrap();
        assert!(!manager.can_inspect_task_placing(1));
        assert_eq!(manager.inspect_task_placing(2, 0), vec![key(0)]);
        assert_eq!(manager.inspect_task_placing(2, 1), vec![key(1)]);

        manager.release_task_placing(2);
        assert!(!manager.can_inspect_task_placing(2));
        assert!(manager.placing().is_empty());
    }

    #[test]
    fn test_unknown_thread() {
        let manager = InMemoryLoggingManager::new(DurabilityMode::Wal, 1);
        assert!(matches!(
            manager.commit_group(3, 0),
            Err(DurabilityError::UnknownThread { thread: 3, .. })
        ));
    }
}
