//! Restoring the store before replay

use crate::error::{SchedulerError, SchedulerResult};
use std::sync::Arc;
use tpg_durability::{DurabilityMode, GroupId, LogRecord, LoggingManager};
use tpg_storage::RecordStore;
use tracing::{info, warn};

/// Where replay has to pick up after the store was restored
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryPlan {
    /// Snapshot the store was restored from
    pub snapshot_id: Option<u64>,
    /// First group whose input must be replayed
    pub replay_from_group: GroupId,
    /// Last group whose write-ahead records were applied
    pub redo_applied_through: Option<GroupId>,
}

/// Restores a store from the latest snapshot and the redo log
pub struct RecoveryManager {
    store: Arc<dyn RecordStore>,
    logging: Arc<dyn LoggingManager>,
    threads: usize,
}

impl RecoveryManager {
    /// Create a manager for `threads` log streams
    pub fn new(store: Arc<dyn RecordStore>, logging: Arc<dyn LoggingManager>, threads: usize) -> Self {
        Self {
            store,
            logging,
            threads,
        }
    }

    /// Restore the store and report where input replay starts
    ///
    /// Without a snapshot the store is left as loaded and replay starts at
    /// group 0. In write-ahead mode the committed writes after the snapshot
    /// are reapplied up to the last group every thread committed; groups
    /// only some threads committed are ignored and replayed from input.
    pub fn recover(&self) -> SchedulerResult<RecoveryPlan> {
        let mut plan = RecoveryPlan::default();
        let snapshot = self.logging.spout_ask_recovery(0, 0)?;
        match &snapshot {
            Some(descriptor) => {
                let loaded = self.logging.load_snapshot(descriptor)?;
                self.store.restore(&loaded)?;
                plan.snapshot_id = Some(descriptor.snapshot_id);
                plan.replay_from_group = descriptor.group + 1;
                info!(
                    snapshot = descriptor.snapshot_id,
                    group = descriptor.group,
                    records = descriptor.records,
                    "Store restored from snapshot"
                );
            }
            None => info!("No snapshot available, replaying from the initial state"),
        }

        if self.logging.mode() == DurabilityMode::Wal {
            let after = snapshot.as_ref().map(|d| d.group);
            let through = self.logging.last_committed_group();
            for thread in 0..self.threads {
                let groups = self.logging.spout_redo(thread, after).map_err(|e| {
                    SchedulerError::RecoveryLogUnreadable {
                        thread,
                        reason: e.to_string(),
                    }
                })?;
                for (group, records) in groups {
                    if through.map_or(true, |last| group > last) {
                        warn!(thread, group, "Ignoring group not committed by every thread");
                        continue;
                    }
                    for record in records {
                        if let LogRecord::Wal { key, value, .. } = record {
                            self.store.insert(key, value)?;
                        }
                    }
                    plan.redo_applied_through = plan.redo_applied_through.max(Some(group));
                }
            }
            if let Some(group) = plan.redo_applied_through {
                plan.replay_from_group = plan.replay_from_group.max(group + 1);
            }
            info!(through = ?plan.redo_applied_through, "Write-ahead log applied");
        }
        Ok(plan)
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("threads", &self.threads)
            .field("mode", &self.logging.mode())
            .finish()
    }
}
