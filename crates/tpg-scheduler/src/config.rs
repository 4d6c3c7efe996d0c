//! Scheduler configuration

use crate::error::{SchedulerError, SchedulerResult};
use crate::types::OpId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tpg_durability::DurabilityMode;

/// Scheduling policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Breadth-first by level, barrier between levels
    #[default]
    Layered,
    /// Layered with coordinated abort and rollback
    LayeredAbort,
    /// No level barriers; unresolved operations wait in a busy-wait queue
    Eager,
    /// Whole chains scheduled by chain level, heaviest chains first
    ChainLayered,
}

impl PolicyKind {
    /// Every policy
    pub const ALL: [PolicyKind; 4] = [
        PolicyKind::Layered,
        PolicyKind::LayeredAbort,
        PolicyKind::Eager,
        PolicyKind::ChainLayered,
    ];
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyKind::Layered => "layered",
            PolicyKind::LayeredAbort => "layered_abort",
            PolicyKind::Eager => "eager",
            PolicyKind::ChainLayered => "chain_layered",
        };
        f.write_str(name)
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "layered" => Ok(PolicyKind::Layered),
            "layered_abort" => Ok(PolicyKind::LayeredAbort),
            "eager" => Ok(PolicyKind::Eager),
            "chain_layered" => Ok(PolicyKind::ChainLayered),
            other => Err(format!("unknown policy: {}", other)),
        }
    }
}

/// Recovery replay options
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Use recorded history views instead of waiting for source keys
    #[serde(default = "default_true")]
    pub history_view: bool,
    /// Place chains by the logged weight plan instead of key ranges
    #[serde(default)]
    pub task_placing: bool,
    /// Skip inputs whose transaction aborted in the logged run
    #[serde(default)]
    pub abort_push_down: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            history_view: true,
            task_placing: false,
            abort_push_down: false,
        }
    }
}

/// Scheduler configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Worker threads
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Keys per table
    #[serde(default = "default_num_items")]
    pub num_items: u64,
    /// Table names
    #[serde(default = "default_tables")]
    pub tables: Vec<String>,
    /// Scheduling policy
    #[serde(default)]
    pub policy: PolicyKind,
    /// Operations pulled per PROCESS step
    #[serde(default = "default_process_batch")]
    pub process_batch: usize,
    /// What committed operations forward to the logging manager
    #[serde(default)]
    pub durability: DurabilityMode,
    /// Recovery replay options
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_threads() -> usize {
    4
}

fn default_num_items() -> u64 {
    10_000
}

fn default_tables() -> Vec<String> {
    vec!["accounts".to_string(), "book_entries".to_string()]
}

fn default_process_batch() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            num_items: default_num_items(),
            tables: default_tables(),
            policy: PolicyKind::default(),
            process_batch: default_process_batch(),
            durability: DurabilityMode::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Reject shapes the graph cannot represent
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.threads == 0 || self.threads > OpId::MAX_SHARDS {
            return Err(SchedulerError::InvalidConfig(format!(
                "threads must be in 1..={}, got {}",
                OpId::MAX_SHARDS,
                self.threads
            )));
        }
        if self.num_items == 0 {
            return Err(SchedulerError::InvalidConfig("num_items must be positive".into()));
        }
        if self.tables.is_empty() {
            return Err(SchedulerError::InvalidConfig("at least one table required".into()));
        }
        let unique: HashSet<_> = self.tables.iter().collect();
        if unique.len() != self.tables.len() {
            return Err(SchedulerError::InvalidConfig("duplicate table names".into()));
        }
        if self.num_items.saturating_mul(self.tables.len() as u64) > u32::MAX as u64 {
            return Err(SchedulerError::InvalidConfig(
                "tables × num_items exceeds chain handle range".into(),
            ));
        }
        if self.process_batch == 0 {
            return Err(SchedulerError::InvalidConfig("process_batch must be positive".into()));
        }
        Ok(())
    }
}
