//! Streaming-ledger driver for the TPG scheduler
//!
//! Generates deposits and guarded transfers over the `accounts` and
//! `book_entries` tables, runs them batch by batch on the configured
//! workers and prints a JSON report. With `--verify-recovery` the log is
//! replayed into a fresh store and compared with the final state.

mod cli;
mod config;
mod runner;
mod workload;

use anyhow::{bail, Result};
use cli::Cli;
use config::BenchConfig;
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let mut config = BenchConfig::load(cli.config.as_deref())?;
    config.apply(&cli);
    config.validate()?;
    tracing::info!(
        threads = config.scheduler.threads,
        num_items = config.scheduler.num_items,
        batches = config.workload.batches,
        batch_size = config.workload.batch_size,
        "tpg-bench starting"
    );

    let batches = workload::generate(&config.workload, config.scheduler.threads, config.scheduler.num_items);
    let run = runner::run(&config, &batches)?;

    let recovery = if cli.verify_recovery {
        Some(runner::verify_recovery(&config, &batches, &run)?)
    } else {
        None
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "report": run.report,
            "recovery": recovery,
        }))?
    );

    if let Some(check) = recovery {
        if check.mismatches > 0 {
            bail!("recovery produced {} mismatching records", check.mismatches);
        }
    }
    Ok(())
}
