//! # tpg-scheduler
//!
//! Task precedence graph scheduler for the TPG transaction engine.
//!
//! Transactions arrive as per-thread batches of [`Request`]s. Each request
//! becomes an [`Operation`] in the [`OperationChain`] of the record it
//! writes. The [`TaskPrecedenceGraph`] links operations with three kinds
//! of dependency edge, levels them, and the [`Scheduler`] runs every
//! worker thread through the levels in lockstep.
//!
//! ## Architecture
//!
//! ```text
//!   submit_request ──▶ TaskPrecedenceGraph ──▶ OperationChain (per table × key)
//!                         │   TD: same key, bid order
//!                         │   FD: reads another key's latest older write
//!                         │   LD: transaction order
//!                         ▼
//!   start_evaluation: INITIALIZE ─▶ EXPLORE ─▶ PROCESS ─▶ NOTIFY ─┐
//!                                     ▲                          │
//!                                     └──────── level end ◀──────┘
//!                                        (policy: barrier / abort / busy-wait)
//!                     commit ─▶ LoggingManager, RESET
//! ```
//!
//! Policies: [`PolicyKind::Layered`], [`PolicyKind::LayeredAbort`] (speculative
//! execution with coordinated rollback), [`PolicyKind::Eager`] and
//! [`PolicyKind::ChainLayered`] (whole chains by chain level). The
//! [`recovery`] module replays logged batches.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod abort;
mod arena;
mod chain;
mod commit;
mod config;
mod context;
mod error;
mod execute;
mod function;
mod operation;
mod policy;
pub mod recovery;
mod request;
mod scheduler;
mod tpg;
mod types;

pub use abort::{FailureRegistry, LevelReduction};
pub use arena::OperationArena;
pub use chain::OperationChain;
pub use config::{PolicyKind, RecoveryConfig, SchedulerConfig};
pub use context::SchedulerContext;
pub use error::{SchedulerError, SchedulerResult};
pub use execute::Outcome;
pub use function::{Avg, Condition, Dec, Function, Inc, OutputSlot, RunningAvg, SuccessCounter, Sum};
pub use operation::Operation;
pub use policy::{LevelStep, SchedulingPolicy};
pub use request::Request;
pub use scheduler::Scheduler;
pub use tpg::TaskPrecedenceGraph;
pub use types::{AccessPattern, ChainId, DependencyType, Granularity, OpId, OperationState};
