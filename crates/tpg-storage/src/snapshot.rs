//! Whole-store snapshots

use serde::{Deserialize, Serialize};
use tpg_primitives::{RecordKey, Value};

/// One record in a snapshot
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Record key
    pub key: RecordKey,
    /// Latest value at capture time
    pub value: Value,
}

/// Point-in-time copy of every record, sorted by key
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    /// Captured records
    pub entries: Vec<SnapshotEntry>,
}

impl StoreSnapshot {
    /// Build a snapshot, sorting entries by key
    pub fn from_entries(mut entries: Vec<SnapshotEntry>) -> Self {
        entries.sort_by_key(|e| e.key);
        Self { entries }
    }

    /// Look up a record
    pub fn get(&self, key: &RecordKey) -> Option<Value> {
        self.entries
            .binary_search_by_key(key, |e| e.key)
            .ok()
            .map(|i| self.entries[i].value)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpg_primitives::{PrimaryKey, TableId};

    fn key(k: u64) -> RecordKey {
        RecordKey::new(TableId(0), PrimaryKey(k))
    }

    #[test]
    fn test_lookup_sorted() {
        let snapshot = StoreSnapshot::from_entries(vec![
            SnapshotEntry { key: key(3), value: Value::Long(30) },
            SnapshotEntry { key: key(1), value: Value::Long(10) },
        ]);
        assert_eq!(snapshot.entries[0].key, key(1));
        assert_eq!(snapshot.get(&key(3)), Some(Value::Long(30)));
        assert_eq!(snapshot.get(&key(2)), None);
    }

    #[test]
    fn test_snapshot_json() {
        let snapshot = StoreSnapshot::from_entries(vec![SnapshotEntry {
            key: key(7),
            value: Value::Double(1.5),
        }]);
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: StoreSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, snapshot);
    }
}
