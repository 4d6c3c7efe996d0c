//! # tpg-storage
//!
//! Record store for the TPG transaction engine.
//!
//! This crate provides:
//! - The `RecordStore` trait consumed by the scheduler
//! - A multi-versioned, concurrent in-memory implementation
//! - The table catalogue
//! - Whole-store snapshots for checkpointing and recovery
//!
//! Every record keeps a committed base value plus one version per batch id
//! written during the current batch. A read at batch id `b` observes the
//! latest version strictly older than `b`, falling back to the base value.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod catalog;
mod error;
mod memory;
mod snapshot;
mod traits;

pub use catalog::TableCatalog;
pub use error::{StorageError, StorageResult};
pub use memory::MemoryStore;
pub use snapshot::{SnapshotEntry, StoreSnapshot};
pub use traits::RecordStore;
