//! Driver configuration: TOML file with CLI overrides

use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tpg_scheduler::SchedulerConfig;

/// Full driver configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Workload shape
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Log mirroring and snapshots
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Streaming-ledger workload shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Number of batches
    #[serde(default = "default_batches")]
    pub batches: usize,
    /// Events per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Share of transfers among events
    #[serde(default = "default_transfer_ratio")]
    pub transfer_ratio: f64,
    /// Largest deposit or transfer amount
    #[serde(default = "default_max_amount")]
    pub max_amount: i64,
    /// Starting balance of every account and book entry
    #[serde(default = "default_initial_balance")]
    pub initial_balance: i64,
    /// Random seed
    #[serde(default)]
    pub seed: u64,
}

fn default_batches() -> usize {
    10
}

fn default_batch_size() -> usize {
    1_000
}

fn default_transfer_ratio() -> f64 {
    0.5
}

fn default_max_amount() -> i64 {
    100
}

fn default_initial_balance() -> i64 {
    1_000
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            batches: default_batches(),
            batch_size: default_batch_size(),
            transfer_ratio: default_transfer_ratio(),
            max_amount: default_max_amount(),
            initial_balance: default_initial_balance(),
            seed: 0,
        }
    }
}

/// Where committed groups go and how often the store is snapshotted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory mirroring committed groups; in memory only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Snapshot the store after every N batches
    #[serde(default)]
    pub snapshot_interval: Option<u64>,
}

impl BenchConfig {
    /// Load a TOML file, or the defaults without one
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Overlay the flags that were given on the command line
    pub fn apply(&mut self, cli: &Cli) {
        if let Some(threads) = cli.threads {
            self.scheduler.threads = threads;
        }
        if let Some(num_items) = cli.num_items {
            self.scheduler.num_items = num_items;
        }
        if let Some(policy) = cli.policy {
            self.scheduler.policy = policy;
        }
        if let Some(durability) = cli.durability {
            self.scheduler.durability = durability;
        }
        if let Some(batches) = cli.batches {
            self.workload.batches = batches;
        }
        if let Some(batch_size) = cli.batch_size {
            self.workload.batch_size = batch_size;
        }
        if let Some(ratio) = cli.transfer_ratio {
            self.workload.transfer_ratio = ratio;
        }
        if let Some(seed) = cli.seed {
            self.workload.seed = seed;
        }
        if let Some(interval) = cli.snapshot_interval {
            self.persistence.snapshot_interval = Some(interval);
        }
        if let Some(dir) = &cli.log_dir {
            self.persistence.log_dir = Some(dir.clone());
        }
    }

    /// Reject configurations the driver cannot run
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        let workload = &self.workload;
        if workload.batches == 0 || workload.batch_size == 0 {
            bail!("batches and batch_size must be positive");
        }
        if !(0.0..=1.0).contains(&workload.transfer_ratio) {
            bail!("transfer_ratio {} outside [0, 1]", workload.transfer_ratio);
        }
        if workload.max_amount < 1 {
            bail!("max_amount must be at least 1");
        }
        if workload.transfer_ratio > 0.0 && self.scheduler.num_items < 2 {
            bail!("transfers need at least two keys per table");
        }
        let tables = &self.scheduler.tables;
        if !tables.iter().any(|t| t == "accounts") || !tables.iter().any(|t| t == "book_entries") {
            bail!("the ledger needs the accounts and book_entries tables");
        }
        if self.persistence.snapshot_interval == Some(0) {
            bail!("snapshot_interval must be positive");
        }
        Ok(())
    }
}
