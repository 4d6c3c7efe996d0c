//! # tpg-durability
//!
//! Durability collaborators for the TPG transaction engine.
//!
//! The scheduler hands every committed operation to a [`LoggingManager`]
//! in a form chosen by the active [`DurabilityMode`], and asks it for
//! snapshots, redo logs, history views and task placement plans during
//! recovery.
//!
//! ```text
//! scheduler ──add_log_record──▶ pending (per thread)
//!           ──commit_group────▶ committed groups ──▶ LogDirectory (JSON lines)
//!                                    │
//!                                    └─ Path mode ──▶ HistoryViews, TaskPlacing
//! driver    ──commit_snapshot─▶ SnapshotStore
//! recovery  ◀─spout_ask_recovery / spout_redo / inspect_dependency_view
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod history;
mod manager;
mod persist;
mod placement;
mod record;
mod snapshot;

pub use error::{DurabilityError, DurabilityResult};
pub use history::{HistoryRecord, HistoryViews};
pub use manager::{InMemoryLoggingManager, LoggingManager};
pub use persist::LogDirectory;
pub use placement::TaskPlacing;
pub use record::{DurabilityMode, LogRecord, OpRef};
pub use snapshot::{SnapshotDescriptor, SnapshotStore};

/// Identifier of a committed batch (the batch marker)
pub type GroupId = u64;
