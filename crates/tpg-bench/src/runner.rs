//! Multi-threaded batch execution and the recovery check

use crate::config::BenchConfig;
use crate::workload::{Batch, ACCOUNTS, BOOK_ENTRIES};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tpg_durability::{InMemoryLoggingManager, LoggingManager};
use tpg_metrics::{Metrics, MetricsSnapshot};
use tpg_primitives::{PrimaryKey, RecordKey, Value};
use tpg_scheduler::recovery::{RecoveryManager, RecoveryPlan, RecoveryScheduler};
use tpg_scheduler::{Scheduler, SchedulerContext};
use tpg_storage::{MemoryStore, RecordStore, TableCatalog};
use tracing::{debug, info, trace, warn};

/// Summary of a run, printed as JSON
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    /// Policy name
    pub policy: String,
    /// Durability mode name
    pub durability: String,
    /// Worker threads
    pub threads: usize,
    /// Events processed
    pub events: usize,
    /// Wall-clock time in milliseconds
    pub elapsed_ms: u128,
    /// Events per second
    pub throughput: f64,
    /// Snapshots committed
    pub snapshots: usize,
    /// Sum of all account balances at the end
    pub accounts_total: i64,
    /// Sum of all book entries at the end
    pub book_entries_total: i64,
    /// Scheduler metrics
    pub metrics: MetricsSnapshot,
}

/// What the recovery check found
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryCheck {
    /// Snapshot the store was restored from
    pub snapshot_id: Option<u64>,
    /// First replayed group
    pub replay_from_group: u64,
    /// Batches replayed through the recovery scheduler
    pub replayed_batches: usize,
    /// Records whose recovered value differs
    pub mismatches: usize,
}

/// A finished run
pub struct BenchRun {
    /// Summary
    pub report: BenchReport,
    /// Store after the last batch
    pub store: Arc<MemoryStore>,
    /// Logging manager the run committed to
    pub logging: Arc<dyn LoggingManager>,
}

/// Store with every ledger record at the initial balance
pub fn seeded_store(config: &BenchConfig) -> Result<Arc<MemoryStore>> {
    let catalog = TableCatalog::new(config.scheduler.tables.iter().cloned())?;
    let store = Arc::new(MemoryStore::new(catalog.clone()));
    for (table, _) in catalog.iter() {
        for key in 0..config.scheduler.num_items {
            store.insert(
                RecordKey::new(table, PrimaryKey(key)),
                Value::Long(config.workload.initial_balance),
            )?;
        }
    }
    Ok(store)
}

fn logging_manager(config: &BenchConfig) -> Result<Arc<dyn LoggingManager>> {
    let mode = config.scheduler.durability;
    let threads = config.scheduler.threads;
    Ok(match &config.persistence.log_dir {
        Some(dir) => Arc::new(
            InMemoryLoggingManager::with_directory(mode, threads, dir)
                .with_context(|| format!("opening log directory {}", dir.display()))?,
        ),
        None => Arc::new(InMemoryLoggingManager::new(mode, threads)),
    })
}

/// Execute every batch across the configured workers
pub fn run(config: &BenchConfig, batches: &[Batch]) -> Result<BenchRun> {
    let threads = config.scheduler.threads;
    let store = seeded_store(config)?;
    let logging = logging_manager(config)?;
    let metrics = Arc::new(Metrics::new());
    let scheduler = Arc::new(
        Scheduler::new(config.scheduler.clone(), store.clone(), logging.clone())?
            .with_metrics(metrics.clone()),
    );
    let contexts = (0..threads)
        .map(|t| scheduler.register_context(t))
        .collect::<Result<Vec<_>, _>>()?;
    let interval = config.persistence.snapshot_interval;

    info!(
        threads,
        policy = %config.scheduler.policy,
        durability = %config.scheduler.durability,
        batches = batches.len(),
        "Run started"
    );
    let started = Instant::now();
    let handles: Vec<_> = contexts
        .into_iter()
        .map(|ctx| {
            let scheduler = Arc::clone(&scheduler);
            let batches = batches.to_vec();
            let store = store.clone();
            thread::spawn(move || worker(&scheduler, ctx, &batches, interval, store.as_ref()))
        })
        .collect();
    let mut snapshots = 0;
    for handle in handles {
        snapshots += handle
            .join()
            .map_err(|_| anyhow!("worker thread panicked"))??;
    }
    let elapsed = started.elapsed();

    let events = batches.iter().map(Batch::event_count).sum();
    let report = BenchReport {
        policy: config.scheduler.policy.to_string(),
        durability: config.scheduler.durability.to_string(),
        threads,
        events,
        elapsed_ms: elapsed.as_millis(),
        throughput: throughput(events, elapsed),
        snapshots,
        accounts_total: table_total(store.as_ref(), ACCOUNTS, config.scheduler.num_items)?,
        book_entries_total: table_total(store.as_ref(), BOOK_ENTRIES, config.scheduler.num_items)?,
        metrics: MetricsSnapshot::from_metrics(&metrics),
    };
    info!(
        events,
        elapsed_ms = report.elapsed_ms,
        throughput = report.throughput,
        "Run finished"
    );
    metrics.log_summary();
    Ok(BenchRun {
        report,
        store,
        logging,
    })
}

/// One worker's loop; thread 0 also takes the snapshots
fn worker(
    scheduler: &Scheduler,
    mut ctx: SchedulerContext,
    batches: &[Batch],
    interval: Option<u64>,
    store: &MemoryStore,
) -> Result<usize> {
    let thread = ctx.thread();
    let mut snapshots = 0;
    for batch in batches {
        let events = &batch.per_thread[thread];
        for event in events {
            trace!(thread, bid = event.bid(), "Submitting event");
            scheduler.txn_submit_begin(&mut ctx);
            for request in event.requests() {
                scheduler.submit_request(&mut ctx, request)?;
            }
            scheduler.txn_submit_finished(&mut ctx)?;
        }
        scheduler.start_evaluation(&mut ctx, batch.marker, events.len())?;
        debug!(thread, marker = batch.marker, "Batch committed");

        // Store writes only happen after the next batch's first barrier.
        if thread == 0 && interval.is_some_and(|n| (batch.marker + 1) % n == 0) {
            scheduler
                .logging()
                .commit_snapshot(batch.marker, store.snapshot())?;
            snapshots += 1;
        }
    }
    Ok(snapshots)
}

/// Rebuild the final state from the log and compare it with the run's
///
/// The store is restored from the latest snapshot (and the redo log in
/// write-ahead mode); the remaining batches are replayed through the
/// recovery scheduler.
pub fn verify_recovery(config: &BenchConfig, batches: &[Batch], run: &BenchRun) -> Result<RecoveryCheck> {
    let threads = config.scheduler.threads;
    let logging: Arc<dyn LoggingManager> = match &config.persistence.log_dir {
        Some(dir) => Arc::new(
            InMemoryLoggingManager::open(config.scheduler.durability, threads, dir)
                .with_context(|| format!("reopening log directory {}", dir.display()))?,
        ),
        None => run.logging.clone(),
    };

    let store = seeded_store(config)?;
    let plan: RecoveryPlan = RecoveryManager::new(store.clone(), logging.clone(), threads).recover()?;
    let pending: Vec<Batch> = batches
        .iter()
        .filter(|b| b.marker >= plan.replay_from_group)
        .cloned()
        .collect();
    info!(
        snapshot = ?plan.snapshot_id,
        from = plan.replay_from_group,
        batches = pending.len(),
        "Replaying input"
    );

    if !pending.is_empty() {
        let recovery = Arc::new(RecoveryScheduler::new(
            config.scheduler.clone(),
            store.clone(),
            logging,
        )?);
        let handles: Vec<_> = (0..threads)
            .map(|thread| {
                let recovery = Arc::clone(&recovery);
                let pending = pending.clone();
                thread::spawn(move || replay_worker(&recovery, thread, &pending))
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| anyhow!("replay thread panicked"))??;
        }
    }

    let mismatches = compare_stores(run.store.as_ref(), store.as_ref(), config)?;
    if mismatches > 0 {
        warn!(mismatches, "Recovered state differs from the run");
    } else {
        info!("Recovered state matches the run");
    }
    Ok(RecoveryCheck {
        snapshot_id: plan.snapshot_id,
        replay_from_group: plan.replay_from_group,
        replayed_batches: pending.len(),
        mismatches,
    })
}

fn replay_worker(recovery: &RecoveryScheduler, thread: usize, batches: &[Batch]) -> Result<()> {
    let mut ctx = recovery.register_context(thread)?;
    for batch in batches {
        let events = &batch.per_thread[thread];
        for event in events {
            recovery.txn_submit_begin(&mut ctx);
            for request in event.requests() {
                recovery.submit_request(&mut ctx, request)?;
            }
            recovery.txn_submit_finished(&mut ctx)?;
        }
        recovery.start_evaluation(&mut ctx, batch.marker, events.len())?;
    }
    debug!(thread, skipped = ctx.skipped(), "Replay finished");
    Ok(())
}

fn compare_stores(expected: &dyn RecordStore, actual: &dyn RecordStore, config: &BenchConfig) -> Result<usize> {
    let mut mismatches = 0;
    for (table, name) in expected.catalog().iter() {
        for key in 0..config.scheduler.num_items {
            let record = RecordKey::new(table, PrimaryKey(key));
            let want = expected.current_value(record)?;
            let got = actual.current_value(record)?;
            if want != got {
                debug!(table = name, key, ?want, ?got, "Recovered value differs");
                mismatches += 1;
            }
        }
    }
    Ok(mismatches)
}

fn table_total(store: &dyn RecordStore, table: &str, num_items: u64) -> Result<i64> {
    let id = store.catalog().resolve(table)?;
    let mut total = 0;
    for key in 0..num_items {
        total += store.current_value(RecordKey::new(id, PrimaryKey(key)))?.as_long()?;
    }
    Ok(total)
}

fn throughput(events: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        0.0
    } else {
        events as f64 / secs
    }
}
