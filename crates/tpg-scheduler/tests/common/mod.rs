//! Shared harness: store setup, workload generation, threaded batch runner
//! and a serial oracle.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use tpg_durability::{DurabilityMode, InMemoryLoggingManager, LoggingManager};
use tpg_primitives::{Bid, PrimaryKey, RecordKey, TableId, Value};
use tpg_scheduler::{
    recovery::RecoveryScheduler, AccessPattern, Condition, Dec, Inc, PolicyKind, RecoveryConfig,
    Request, Scheduler, SchedulerConfig, SchedulerContext, SuccessCounter,
};
use tpg_storage::{MemoryStore, RecordStore, TableCatalog};

pub const ACCOUNTS: &str = "accounts";
pub const BOOK_ENTRIES: &str = "book_entries";
pub const INITIAL_BALANCE: i64 = 100;

pub fn catalog() -> TableCatalog {
    TableCatalog::new([ACCOUNTS, BOOK_ENTRIES]).unwrap()
}

pub fn record(table: u16, key: u64) -> RecordKey {
    RecordKey::new(TableId(table), PrimaryKey(key))
}

/// Store with every account and book entry at `INITIAL_BALANCE`
pub fn seeded_store(num_items: u64) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(catalog()));
    for table in 0..2 {
        for key in 0..num_items {
            store
                .insert(record(table, key), Value::Long(INITIAL_BALANCE))
                .unwrap();
        }
    }
    store
}

pub fn config(policy: PolicyKind, threads: usize, num_items: u64, mode: DurabilityMode) -> SchedulerConfig {
    SchedulerConfig {
        threads,
        num_items,
        tables: vec![ACCOUNTS.into(), BOOK_ENTRIES.into()],
        policy,
        process_batch: 8,
        durability: mode,
        recovery: RecoveryConfig::default(),
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub logging: Arc<InMemoryLoggingManager>,
    pub scheduler: Arc<Scheduler>,
}

pub fn harness(policy: PolicyKind, threads: usize, num_items: u64, mode: DurabilityMode) -> Harness {
    let store = seeded_store(num_items);
    let logging = Arc::new(InMemoryLoggingManager::new(mode, threads));
    let scheduler = Scheduler::new(
        config(policy, threads, num_items, mode),
        store.clone(),
        logging.clone() as Arc<dyn LoggingManager>,
    )
    .unwrap();
    Harness {
        store,
        logging,
        scheduler: Arc::new(scheduler),
    }
}

// ============================================================================
// Workload
// ============================================================================

/// One logical transaction, independent of the scheduler
#[derive(Clone, Debug, PartialEq)]
pub enum Txn {
    Deposit { bid: u64, key: u64, amount: i64 },
    /// Four guarded writes; with `shared_guard` every write is guarded on
    /// the source account, otherwise each table on its own source record
    Transfer {
        bid: u64,
        src: u64,
        dst: u64,
        amount: i64,
        shared_guard: bool,
    },
}

impl Txn {
    pub fn bid(&self) -> u64 {
        match self {
            Txn::Deposit { bid, .. } | Txn::Transfer { bid, .. } => *bid,
        }
    }

    pub fn requests(&self) -> Vec<Request> {
        match *self {
            Txn::Deposit { bid, key, amount } => vec![
                Request::read_write(Bid(bid), ACCOUNTS, PrimaryKey(key), Inc(Value::Long(amount))),
                Request::read_write(Bid(bid), BOOK_ENTRIES, PrimaryKey(key), Inc(Value::Long(amount))),
            ],
            Txn::Transfer {
                bid,
                src,
                dst,
                amount,
                shared_guard,
            } => {
                let success = SuccessCounter::new();
                let guarded = |table: &str, key: u64, delta: Value, debit: bool| {
                    let guard_table = if shared_guard { ACCOUNTS } else { table };
                    let req = Request::new(Bid(bid), AccessPattern::ReadWriteCond, table, PrimaryKey(key))
                        .with_condition(Condition::greater_than(amount))
                        .with_source(guard_table, PrimaryKey(src))
                        .with_success(success.clone());
                    if debit {
                        req.with_function(Dec(delta))
                    } else {
                        req.with_function(Inc(delta))
                    }
                };
                vec![
                    guarded(ACCOUNTS, src, Value::Long(amount), true),
                    guarded(ACCOUNTS, dst, Value::Long(amount), false),
                    guarded(BOOK_ENTRIES, src, Value::Long(amount), true),
                    guarded(BOOK_ENTRIES, dst, Value::Long(amount), false),
                ]
            }
        }
    }
}

/// `batches[b][thread]` holds the transactions thread submits in batch `b`
pub type Workload = Vec<Vec<Vec<Txn>>>;

pub fn random_workload(
    seed: u64,
    batches: usize,
    threads: usize,
    txns_per_thread: usize,
    num_items: u64,
    shared_guard: bool,
) -> Workload {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bid = 1;
    (0..batches)
        .map(|_| {
            let mut per_thread = vec![Vec::new(); threads];
            for _ in 0..txns_per_thread {
                for txns in per_thread.iter_mut() {
                    let txn = if rng.gen_bool(0.4) {
                        Txn::Deposit {
                            bid,
                            key: rng.gen_range(0..num_items),
                            amount: rng.gen_range(1..50),
                        }
                    } else {
                        let src = rng.gen_range(0..num_items);
                        let mut dst = rng.gen_range(0..num_items);
                        if dst == src {
                            dst = (src + 1) % num_items;
                        }
                        Txn::Transfer {
                            bid,
                            src,
                            dst,
                            amount: rng.gen_range(1..150),
                            shared_guard,
                        }
                    };
                    txns.push(txn);
                    bid += 1;
                }
            }
            per_thread
        })
        .collect()
}

// ============================================================================
// Runner
// ============================================================================

/// Run every batch on `threads` workers, numbering groups from
/// `first_marker`; `inspect` sees the graph of each batch on thread 0
/// before it is reset
pub fn run_workload<F>(scheduler: &Arc<Scheduler>, workload: &[Vec<Vec<Txn>>], first_marker: u64, inspect: F)
where
    F: Fn(&Scheduler) + Send + Sync + 'static,
{
    let threads = scheduler.config().threads;
    let contexts: Vec<SchedulerContext> = (0..threads)
        .map(|t| scheduler.register_context(t).unwrap())
        .collect();
    let inspect = Arc::new(inspect);

    let handles: Vec<_> = contexts
        .into_iter()
        .enumerate()
        .map(|(t, mut ctx)| {
            let scheduler = Arc::clone(scheduler);
            let inspect = Arc::clone(&inspect);
            let batches: Vec<Vec<Txn>> = workload.iter().map(|b| b[t].clone()).collect();
            thread::spawn(move || {
                for (offset, txns) in batches.into_iter().enumerate() {
                    let marker = first_marker + offset as u64;
                    for txn in &txns {
                        scheduler.txn_submit_begin(&mut ctx);
                        for request in txn.requests() {
                            scheduler.submit_request(&mut ctx, request).unwrap();
                        }
                        scheduler.txn_submit_finished(&mut ctx).unwrap();
                    }
                    scheduler.run_batch(&mut ctx, marker, txns.len()).unwrap();
                    if t == 0 {
                        inspect(&scheduler);
                    }
                    scheduler.reset(&mut ctx).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

/// Replay batches through a recovery scheduler, numbering groups from
/// `first_marker`; returns how many requests abort push-down skipped
pub fn replay_workload(
    recovery: &Arc<RecoveryScheduler>,
    threads: usize,
    workload: &[Vec<Vec<Txn>>],
    first_marker: u64,
) -> usize {
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let recovery = Arc::clone(recovery);
            let batches: Vec<Vec<Txn>> = workload.iter().map(|b| b[t].clone()).collect();
            thread::spawn(move || {
                let mut ctx = recovery.register_context(t).unwrap();
                let mut skipped = 0;
                for (offset, txns) in batches.into_iter().enumerate() {
                    for txn in &txns {
                        recovery.txn_submit_begin(&mut ctx);
                        for request in txn.requests() {
                            recovery.submit_request(&mut ctx, request).unwrap();
                        }
                        recovery.txn_submit_finished(&mut ctx).unwrap();
                    }
                    skipped += ctx.skipped();
                    recovery
                        .start_evaluation(&mut ctx, first_marker + offset as u64, txns.len())
                        .unwrap();
                }
                skipped
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).sum()
}

// ============================================================================
// Oracle
// ============================================================================

/// Serial model of the ledger
///
/// Each transaction reads the state left by every older transaction.
/// With `atomic`, a transaction whose guard fails anywhere applies nothing;
/// otherwise each guarded write stands alone.
pub fn serial_oracle(workload: &[Vec<Vec<Txn>>], num_items: u64, atomic: bool) -> HashMap<RecordKey, i64> {
    let mut state = HashMap::new();
    for table in 0..2 {
        for key in 0..num_items {
            state.insert(record(table, key), INITIAL_BALANCE);
        }
    }
    let mut txns: Vec<&Txn> = workload.iter().flatten().flatten().collect();
    txns.sort_by_key(|txn| txn.bid());

    for txn in txns {
        match *txn {
            Txn::Deposit { key, amount, .. } => {
                for table in 0..2 {
                    *state.get_mut(&record(table, key)).unwrap() += amount;
                }
            }
            Txn::Transfer {
                src,
                dst,
                amount,
                shared_guard,
                ..
            } => {
                let guard_on = |table: u16| if shared_guard { 0 } else { table };
                let passes: Vec<bool> = (0..2)
                    .map(|table| state[&record(guard_on(table), src)] > amount)
                    .collect();
                if atomic && passes.iter().any(|p| !p) {
                    continue;
                }
                for table in 0..2u16 {
                    if passes[table as usize] {
                        *state.get_mut(&record(table, src)).unwrap() -= amount;
                        *state.get_mut(&record(table, dst)).unwrap() += amount;
                    }
                }
            }
        }
    }
    state
}

pub fn assert_matches_oracle(store: &MemoryStore, oracle: &HashMap<RecordKey, i64>) {
    for (key, expected) in oracle {
        let actual = store.current_value(*key).unwrap();
        assert_eq!(actual, Value::Long(*expected), "mismatch at {}", key);
    }
}
