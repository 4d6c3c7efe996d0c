//! Concurrent in-memory record store

use crate::catalog::TableCatalog;
use crate::error::{StorageError, StorageResult};
use crate::snapshot::{SnapshotEntry, StoreSnapshot};
use crate::traits::RecordStore;
use dashmap::DashMap;
use std::collections::BTreeMap;
use tpg_primitives::{Bid, RecordKey, Value};
use tracing::debug;

/// A record and the versions written during the current batch
#[derive(Clone, Debug, Default)]
struct VersionedRecord {
    base: Value,
    versions: BTreeMap<Bid, Value>,
}

impl VersionedRecord {
    fn new(base: Value) -> Self {
        Self {
            base,
            versions: BTreeMap::new(),
        }
    }

    fn read_before(&self, bid: Bid) -> Value {
        self.versions
            .range(..bid)
            .next_back()
            .map(|(_, v)| *v)
            .unwrap_or(self.base)
    }

    fn latest(&self) -> Value {
        self.versions
            .values()
            .next_back()
            .copied()
            .unwrap_or(self.base)
    }
}

/// In-memory store keyed by (table, primary key)
#[derive(Debug)]
pub struct MemoryStore {
    catalog: TableCatalog,
    records: DashMap<RecordKey, VersionedRecord>,
}

impl MemoryStore {
    /// Create an empty store over a catalogue
    pub fn new(catalog: TableCatalog) -> Self {
        Self {
            catalog,
            records: DashMap::new(),
        }
    }

    /// Number of uncollapsed versions held for a record
    pub fn version_count(&self, key: RecordKey) -> usize {
        self.records
            .get(&key)
            .map(|r| r.versions.len())
            .unwrap_or(0)
    }
}

impl RecordStore for MemoryStore {
    fn catalog(&self) -> &TableCatalog {
        &self.catalog
    }

    fn insert(&self, key: RecordKey, value: Value) -> StorageResult<()> {
        if self.catalog.name(key.table).is_none() {
            return Err(StorageError::UnknownTable(format!("#{}", key.table.0)));
        }
        self.records.insert(key, VersionedRecord::new(value));
        Ok(())
    }

    fn read_value_at(&self, key: RecordKey, bid: Bid) -> StorageResult<Value> {
        self.records
            .get(&key)
            .map(|r| r.read_before(bid))
            .ok_or(StorageError::RecordNotFound(key))
    }

    fn write_value_at(&self, key: RecordKey, bid: Bid, value: Value) -> StorageResult<()> {
        let mut record = self
            .records
            .get_mut(&key)
            .ok_or(StorageError::RecordNotFound(key))?;
        record.versions.insert(bid, value);
        Ok(())
    }

    fn remove_version(&self, key: RecordKey, bid: Bid) -> StorageResult<bool> {
        let mut record = self
            .records
            .get_mut(&key)
            .ok_or(StorageError::RecordNotFound(key))?;
        Ok(record.versions.remove(&bid).is_some())
    }

    fn current_value(&self, key: RecordKey) -> StorageResult<Value> {
        self.records
            .get(&key)
            .map(|r| r.latest())
            .ok_or(StorageError::RecordNotFound(key))
    }

    fn collapse_versions(&self, key: RecordKey) -> StorageResult<()> {
        let mut record = self
            .records
            .get_mut(&key)
            .ok_or(StorageError::RecordNotFound(key))?;
        record.base = record.latest();
        record.versions.clear();
        Ok(())
    }

    fn snapshot(&self) -> StoreSnapshot {
        let entries = self
            .records
            .iter()
            .map(|r| SnapshotEntry {
                key: *r.key(),
                value: r.latest(),
            })
            .collect();
        StoreSnapshot::from_entries(entries)
    }

    fn restore(&self, snapshot: &StoreSnapshot) -> StorageResult<()> {
        if let Some(entry) = snapshot
            .entries
            .iter()
            .find(|e| self.catalog.name(e.key.table).is_none())
        {
            return Err(StorageError::SnapshotMismatch(format!(
                "table #{} not in catalogue",
                entry.key.table.0
            )));
        }
        self.records.clear();
        for entry in &snapshot.entries {
            self.records.insert(entry.key, VersionedRecord::new(entry.value));
        }
        debug!(records = snapshot.len(), "Restored store from snapshot");
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
