//! # tpg-primitives
//!
//! Primitive types for the TPG transaction engine.
//!
//! This crate provides the vocabulary shared by the record store, the
//! durability layer and the scheduler: batch ids, record keys, record
//! values and the key-range partitioning of worker threads.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod key;
mod partition;
mod value;

pub use error::{PrimitiveError, PrimitiveResult};
pub use key::{Bid, PrimaryKey, RecordKey, TableId};
pub use partition::Partitioner;
pub use value::Value;

/// Worker thread index
pub type ThreadId = usize;

/// Intra-transaction operation sequence number
pub type TxnOpId = u32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_key_owner() {
        let partitioner = Partitioner::new(4, 100).unwrap();
        let key = RecordKey::new(TableId(0), PrimaryKey(99));
        assert_eq!(partitioner.owner(key.key).unwrap(), 3);
    }
}
