//! CLI argument parsing for tpg-bench

use clap::Parser;
use std::path::PathBuf;
use tpg_durability::DurabilityMode;
use tpg_scheduler::PolicyKind;

/// Streaming-ledger benchmark driver
#[derive(Parser, Debug, Clone)]
#[command(name = "tpg-bench")]
#[command(about = "Run a streaming-ledger workload through the TPG scheduler")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Worker threads
    #[arg(long)]
    pub threads: Option<usize>,

    /// Keys per table
    #[arg(long)]
    pub num_items: Option<u64>,

    /// Scheduling policy (layered, layered-abort, eager, chain-layered)
    #[arg(long)]
    pub policy: Option<PolicyKind>,

    /// Durability mode (none, wal, path, dependency, lineage, command)
    #[arg(long)]
    pub durability: Option<DurabilityMode>,

    /// Number of batches
    #[arg(long)]
    pub batches: Option<usize>,

    /// Events per batch
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Share of transfers among events, between 0 and 1
    #[arg(long)]
    pub transfer_ratio: Option<f64>,

    /// Workload seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Take a store snapshot every N batches
    #[arg(long)]
    pub snapshot_interval: Option<u64>,

    /// Directory mirroring committed log groups and snapshots
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Replay the log into a fresh store and compare final states
    #[arg(long)]
    pub verify_recovery: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["tpg-bench"]);
        assert!(cli.config.is_none());
        assert!(cli.threads.is_none());
        assert!(cli.policy.is_none());
        assert!(!cli.verify_recovery);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_cli_custom_values() {
        let cli = Cli::parse_from([
            "tpg-bench",
            "--threads", "8",
            "--policy", "layered-abort",
            "--durability", "path",
            "--batches", "12",
            "--snapshot-interval", "4",
            "--verify-recovery",
        ]);
        assert_eq!(cli.threads, Some(8));
        assert_eq!(cli.policy, Some(PolicyKind::LayeredAbort));
        assert_eq!(cli.durability, Some(DurabilityMode::Path));
        assert_eq!(cli.batches, Some(12));
        assert_eq!(cli.snapshot_interval, Some(4));
        assert!(cli.verify_recovery);
    }

    #[test]
    fn test_cli_rejects_unknown_policy() {
        assert!(Cli::try_parse_from(["tpg-bench", "--policy", "fifo"]).is_err());
    }
}
