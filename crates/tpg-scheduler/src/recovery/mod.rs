//! Recovery: restore the store, then replay logged input
//!
//! ```text
//!   RecoveryManager::recover ── snapshot ──▶ store.restore
//!                            └─ WAL redo ──▶ store.insert
//!   RecoveryScheduler        ── per batch ──▶ shadows, round-robin chains,
//!                                            re-run until no new aborts
//! ```

mod graph;
mod manager;
mod scheduler;

pub use graph::RecoveryGraph;
pub use manager::{RecoveryManager, RecoveryPlan};
pub use scheduler::{RecoveryContext, RecoveryScheduler};
