//! Throughput of one batch under each scheduling policy
//!
//! Run with: cargo bench -p tpg-scheduler --bench layered_bench
//!
//! Groups:
//!   1. deposits   - unguarded read-modify-writes, no failures
//!   2. transfers  - guarded transfers with a share of failing guards

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::Cell;
use std::sync::Arc;
use std::thread;
use tpg_durability::{DurabilityMode, InMemoryLoggingManager};
use tpg_primitives::{Bid, PrimaryKey, RecordKey, TableId, Value};
use tpg_scheduler::{
    AccessPattern, Condition, Dec, Inc, PolicyKind, Request, Scheduler, SchedulerConfig,
    SchedulerContext, SuccessCounter,
};
use tpg_storage::{MemoryStore, RecordStore, TableCatalog};

const THREADS: usize = 4;
const NUM_ITEMS: u64 = 4096;
const TXNS_PER_THREAD: usize = 256;
const POLICIES: [PolicyKind; 4] = PolicyKind::ALL;

fn scheduler(policy: PolicyKind) -> Scheduler {
    let store = Arc::new(MemoryStore::new(
        TableCatalog::new(["accounts", "book_entries"]).expect("catalog"),
    ));
    for table in 0..2 {
        for key in 0..NUM_ITEMS {
            store
                .insert(RecordKey::new(TableId(table), PrimaryKey(key)), Value::Long(1_000))
                .expect("seed");
        }
    }
    let config = SchedulerConfig {
        threads: THREADS,
        num_items: NUM_ITEMS,
        policy,
        ..SchedulerConfig::default()
    };
    let logging = Arc::new(InMemoryLoggingManager::new(DurabilityMode::None, THREADS));
    Scheduler::new(config, store, logging).expect("scheduler")
}

fn deposit(bid: u64, key: u64) -> Vec<Request> {
    ["accounts", "book_entries"]
        .into_iter()
        .map(|table| Request::read_write(Bid(bid), table, PrimaryKey(key), Inc(Value::Long(5))))
        .collect()
}

fn transfer(bid: u64, src: u64, dst: u64, amount: i64) -> Vec<Request> {
    let success = SuccessCounter::new();
    let mut requests = Vec::with_capacity(4);
    for table in ["accounts", "book_entries"] {
        for (key, debit) in [(src, true), (dst, false)] {
            let req = Request::new(Bid(bid), AccessPattern::ReadWriteCond, table, PrimaryKey(key))
                .with_condition(Condition::greater_than(amount))
                .with_source("accounts", PrimaryKey(src))
                .with_success(success.clone());
            requests.push(if debit {
                req.with_function(Dec(Value::Long(amount)))
            } else {
                req.with_function(Inc(Value::Long(amount)))
            });
        }
    }
    requests
}

/// `batch[thread]` holds that thread's transactions
fn batch(seed: u64, transfers: bool) -> Vec<Vec<Vec<Request>>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut bid = 1;
    let mut batch = vec![Vec::new(); THREADS];
    for _ in 0..TXNS_PER_THREAD {
        for txns in batch.iter_mut() {
            let src = rng.gen_range(0..NUM_ITEMS);
            txns.push(if transfers {
                let dst = (src + rng.gen_range(1..NUM_ITEMS)) % NUM_ITEMS;
                transfer(bid, src, dst, rng.gen_range(1..1_500))
            } else {
                deposit(bid, src)
            });
            bid += 1;
        }
    }
    batch
}

fn run_batch(scheduler: &Scheduler, contexts: &mut [SchedulerContext], batch: Vec<Vec<Vec<Request>>>, marker: u64) {
    thread::scope(|s| {
        for (ctx, txns) in contexts.iter_mut().zip(batch) {
            s.spawn(move || {
                let count = txns.len();
                for txn in txns {
                    scheduler.txn_submit_begin(ctx);
                    for request in txn {
                        scheduler.submit_request(ctx, request).expect("submit");
                    }
                    scheduler.txn_submit_finished(ctx).expect("finish");
                }
                scheduler.start_evaluation(ctx, marker, count).expect("evaluate");
            });
        }
    });
}

fn bench_workload(c: &mut Criterion, name: &str, transfers: bool) {
    let mut group = c.benchmark_group(name);
    group.throughput(Throughput::Elements((THREADS * TXNS_PER_THREAD) as u64));
    group.sample_size(20);

    for policy in POLICIES {
        let scheduler = scheduler(policy);
        let mut contexts: Vec<SchedulerContext> = (0..THREADS)
            .map(|t| scheduler.register_context(t).expect("context"))
            .collect();
        let marker = Cell::new(0);

        group.bench_with_input(BenchmarkId::from_parameter(policy), &policy, |b, _| {
            b.iter_batched(
                || batch(marker.get(), transfers),
                |batch| {
                    run_batch(&scheduler, &mut contexts, batch, marker.get());
                    marker.set(marker.get() + 1);
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_deposits(c: &mut Criterion) {
    bench_workload(c, "deposits", false);
}

fn bench_transfers(c: &mut Criterion) {
    bench_workload(c, "transfers", true);
}

criterion_group!(benches, bench_deposits, bench_transfers);
criterion_main!(benches);
