//! Storage error types

use thiserror::Error;
use tpg_primitives::RecordKey;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record was never loaded into the store
    #[error("record {0} not found")]
    RecordNotFound(RecordKey),

    /// Table name is not in the catalogue
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Table registered twice
    #[error("duplicate table: {0}")]
    DuplicateTable(String),

    /// Snapshot references a table outside the catalogue
    #[error("snapshot does not match catalogue: {0}")]
    SnapshotMismatch(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tpg_primitives::{PrimaryKey, TableId};

    #[test]
    fn test_error_display() {
        let err = StorageError::RecordNotFound(RecordKey::new(TableId(1), PrimaryKey(9)));
        assert!(err.to_string().contains("1:9"));

        let err = StorageError::UnknownTable("accounts".into());
        assert!(err.to_string().contains("accounts"));
    }
}
