//! Snapshot store

use crate::error::{DurabilityError, DurabilityResult};
use crate::GroupId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tpg_storage::StoreSnapshot;

/// Metadata of a committed snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    /// Snapshot id, increasing
    pub snapshot_id: u64,
    /// Last group whose effects the snapshot contains
    pub group: GroupId,
    /// Number of records captured
    pub records: usize,
}

/// Committed snapshots ordered by id
#[derive(Debug, Default)]
pub struct SnapshotStore {
    snapshots: RwLock<BTreeMap<u64, (SnapshotDescriptor, Arc<StoreSnapshot>)>>,
}

impl SnapshotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Commit a snapshot taken after `group`
    pub fn commit(&self, group: GroupId, snapshot: StoreSnapshot) -> SnapshotDescriptor {
        let mut snapshots = self.snapshots.write();
        let snapshot_id = snapshots.keys().next_back().map(|id| id + 1).unwrap_or(0);
        let descriptor = SnapshotDescriptor {
            snapshot_id,
            group,
            records: snapshot.len(),
        };
        snapshots.insert(snapshot_id, (descriptor, Arc::new(snapshot)));
        descriptor
    }

    /// Re-insert a snapshot loaded from disk
    pub fn insert(&self, descriptor: SnapshotDescriptor, snapshot: StoreSnapshot) {
        self.snapshots
            .write()
            .insert(descriptor.snapshot_id, (descriptor, Arc::new(snapshot)));
    }

    /// Latest snapshot covering at least `since_group`
    pub fn latest_since(&self, since_group: GroupId) -> Option<SnapshotDescriptor> {
        self.snapshots
            .read()
            .values()
            .rev()
            .map(|(d, _)| *d)
            .find(|d| d.group >= since_group)
    }

    /// Load snapshot content
    pub fn load(&self, snapshot_id: u64) -> DurabilityResult<Arc<StoreSnapshot>> {
        self.snapshots
            .read()
            .get(&snapshot_id)
            .map(|(_, s)| Arc::clone(s))
            .ok_or(DurabilityError::SnapshotNotFound(snapshot_id))
    }

    /// Number of snapshots
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Check if no snapshot was taken
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_since() {
        let store = SnapshotStore::new();
        assert!(store.latest_since(0).is_none());

        let first = store.commit(4, StoreSnapshot::default());
        let second = store.commit(9, StoreSnapshot::default());
        assert_eq!(first.snapshot_id, 0);
        assert_eq!(second.snapshot_id, 1);

        assert_eq!(store.latest_since(0), Some(second));
        assert_eq!(store.latest_since(10), None);
        assert!(store.load(1).is_ok());
        assert!(matches!(
            store.load(5),
            Err(DurabilityError::SnapshotNotFound(5))
        ));
    }
}
