//! Error types for the scheduler

use thiserror::Error;
use tpg_durability::DurabilityError;
use tpg_primitives::ThreadId;
use tpg_storage::StorageError;

/// Scheduler errors
///
/// Guard failures are business outcomes and never surface here. Every
/// variant is fatal for the worker thread that hits it.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Key maps to no registered partition
    #[error("key {key} of table {table} maps to no registered partition")]
    PartitionMismatch {
        /// Table name
        table: String,
        /// Primary key
        key: u64,
    },

    /// Table is not in the catalogue
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Unsupported access pattern or missing mandatory request field
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Record store failure
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Logging manager failure
    #[error("durability error: {0}")]
    Durability(#[from] DurabilityError),

    /// Redo log could not be read during recovery
    #[error("recovery log of thread {thread} unreadable: {reason}")]
    RecoveryLogUnreadable {
        /// Thread whose log failed
        thread: ThreadId,
        /// Underlying error
        reason: String,
    },

    /// Context used before its key range was registered
    #[error("thread {0} has no registered context")]
    ContextNotRegistered(ThreadId),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tpg_primitives::{PrimaryKey, RecordKey, TableId};

    #[test]
    fn test_error_display() {
        let err = SchedulerError::PartitionMismatch {
            table: "accounts".into(),
            key: 42,
        };
        assert!(err.to_string().contains("42"));
        assert!(err.to_string().contains("accounts"));

        let err = SchedulerError::RecoveryLogUnreadable {
            thread: 3,
            reason: "corrupt".into(),
        };
        assert!(err.to_string().contains("thread 3"));

        let err: SchedulerError =
            StorageError::RecordNotFound(RecordKey::new(TableId(0), PrimaryKey(1))).into();
        assert!(matches!(err, SchedulerError::Storage(_)));
    }
}
