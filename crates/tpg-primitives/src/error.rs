//! Common error types for primitives

use thiserror::Error;

/// Primitive operation error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrimitiveError {
    /// Partition shape cannot be built
    #[error("invalid partition: {threads} threads over {num_items} items")]
    InvalidPartition {
        /// Requested worker threads
        threads: usize,
        /// Keys per table
        num_items: u64,
    },

    /// Key lies outside every registered key range
    #[error("key {key} outside partitioned range 0..{num_items}")]
    KeyOutOfRange {
        /// Offending key
        key: u64,
        /// Keys per table
        num_items: u64,
    },

    /// Value has the wrong numeric kind for an operation
    #[error("value type mismatch: expected {expected}, got {found}")]
    TypeMismatch {
        /// Expected kind
        expected: &'static str,
        /// Actual kind
        found: &'static str,
    },
}

/// Result type for primitive operations
pub type PrimitiveResult<T> = Result<T, PrimitiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PrimitiveError::KeyOutOfRange {
            key: 12,
            num_items: 10,
        };
        assert!(err.to_string().contains("12"));

        let err = PrimitiveError::InvalidPartition {
            threads: 0,
            num_items: 10,
        };
        assert!(err.to_string().contains("0 threads"));
    }
}
