//! Record store trait

use crate::catalog::TableCatalog;
use crate::error::StorageResult;
use crate::snapshot::StoreSnapshot;
use tpg_primitives::{Bid, RecordKey, Value};

/// Multi-versioned keyed record store
///
/// Writers only ever touch the versions of records their thread owns, but
/// readers at any batch id may run concurrently from every thread.
pub trait RecordStore: Send + Sync {
    /// Table catalogue of this store
    fn catalog(&self) -> &TableCatalog;

    /// Load or overwrite the committed base value of a record
    fn insert(&self, key: RecordKey, value: Value) -> StorageResult<()>;

    /// Value visible to an operation at `bid`: the latest version older
    /// than `bid`, or the base value
    fn read_value_at(&self, key: RecordKey, bid: Bid) -> StorageResult<Value>;

    /// Write the version produced by the operation at `bid`
    fn write_value_at(&self, key: RecordKey, bid: Bid, value: Value) -> StorageResult<()>;

    /// Drop the version written at `bid`; returns whether one existed
    fn remove_version(&self, key: RecordKey, bid: Bid) -> StorageResult<bool>;

    /// Latest value of a record
    fn current_value(&self, key: RecordKey) -> StorageResult<Value>;

    /// Fold every version of a record into its base value
    fn collapse_versions(&self, key: RecordKey) -> StorageResult<()>;

    /// Capture the latest value of every record
    fn snapshot(&self) -> StoreSnapshot;

    /// Replace every record with the content of a snapshot
    fn restore(&self, snapshot: &StoreSnapshot) -> StorageResult<()>;

    /// Number of records
    fn len(&self) -> usize;

    /// Check if the store holds no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
