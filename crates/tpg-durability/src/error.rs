//! Durability error types

use std::path::PathBuf;
use thiserror::Error;

/// Durability errors
#[derive(Debug, Error)]
pub enum DurabilityError {
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted log could not be parsed
    #[error("corrupt log {path:?} at line {line}: {reason}")]
    Corrupt {
        /// File being read
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Parser message
        reason: String,
    },

    /// Snapshot id is unknown
    #[error("snapshot {0} not found")]
    SnapshotNotFound(u64),

    /// Thread index outside the configured worker pool
    #[error("thread {thread} outside pool of {threads}")]
    UnknownThread {
        /// Requested thread
        thread: usize,
        /// Pool size
        threads: usize,
    },
}

/// Result type for durability operations
pub type DurabilityResult<T> = Result<T, DurabilityError>;
