//! End-to-end ledger scenarios on a single worker
//!
//! Tests cover:
//! - Guarded transfers that pass and fail under every policy
//! - Read-returning and aggregating access patterns
//! - Submission errors

mod common;

use common::*;
use tpg_durability::DurabilityMode;
use tpg_primitives::{Bid, PrimaryKey, Value};
use tpg_scheduler::{
    AccessPattern, Avg, Condition, Dec, Inc, OutputSlot, PolicyKind, Request, RunningAvg,
    SchedulerError, SuccessCounter, Sum,
};
use tpg_storage::RecordStore;

const POLICIES: [PolicyKind; 4] = PolicyKind::ALL;

fn transfer(bid: u64, src: u64, dst: u64, amount: i64, success: &SuccessCounter) -> Vec<Request> {
    let leg = |key: u64, debit: bool| {
        let req = Request::new(Bid(bid), AccessPattern::ReadWriteCond, ACCOUNTS, PrimaryKey(key))
            .with_condition(Condition::greater_than(amount))
            .with_source(ACCOUNTS, PrimaryKey(src))
            .with_success(success.clone());
        if debit {
            req.with_function(Dec(Value::Long(amount)))
        } else {
            req.with_function(Inc(Value::Long(amount)))
        }
    };
    vec![leg(src, true), leg(dst, false)]
}

fn run_single(h: &Harness, txns: Vec<Vec<Request>>) {
    let scheduler = &h.scheduler;
    let mut ctx = scheduler.register_context(0).unwrap();
    let count = txns.len();
    for txn in txns {
        scheduler.txn_submit_begin(&mut ctx);
        for request in txn {
            assert!(scheduler.submit_request(&mut ctx, request).unwrap());
        }
        scheduler.txn_submit_finished(&mut ctx).unwrap();
    }
    scheduler.start_evaluation(&mut ctx, 0, count).unwrap();
}

fn balance(h: &Harness, table: u16, key: u64) -> Value {
    h.store.current_value(record(table, key)).unwrap()
}

// ============================================================================
// Transfers
// ============================================================================

#[test]
fn transfer_moves_funds_when_guard_holds() {
    for policy in POLICIES {
        let h = harness(policy, 1, 8, DurabilityMode::None);
        h.store.insert(record(0, 1), Value::Long(50)).unwrap();
        let success = SuccessCounter::new();

        run_single(&h, vec![transfer(1, 0, 1, 30, &success)]);

        assert_eq!(balance(&h, 0, 0), Value::Long(70), "{policy}");
        assert_eq!(balance(&h, 0, 1), Value::Long(80), "{policy}");
        assert_eq!(success.get(), 2, "{policy}");
    }
}

#[test]
fn transfer_exceeding_balance_leaves_accounts_unchanged() {
    for policy in POLICIES {
        let h = harness(policy, 1, 8, DurabilityMode::None);
        h.store.insert(record(0, 1), Value::Long(50)).unwrap();
        let success = SuccessCounter::new();

        run_single(&h, vec![transfer(1, 0, 1, 200, &success)]);

        assert_eq!(balance(&h, 0, 0), Value::Long(100), "{policy}");
        assert_eq!(balance(&h, 0, 1), Value::Long(50), "{policy}");
        assert_eq!(success.get(), 0, "{policy}");
    }
}

#[test]
fn chained_transfers_see_earlier_results() {
    for policy in POLICIES {
        let h = harness(policy, 1, 8, DurabilityMode::None);
        let first = SuccessCounter::new();
        let second = SuccessCounter::new();
        let third = SuccessCounter::new();

        // 0 -> 1 (60), then 1 -> 2 (150) only possible after the first
        // lands, then 0 -> 3 (60) fails because 0 holds 40
        run_single(
            &h,
            vec![
                transfer(1, 0, 1, 60, &first),
                transfer(2, 1, 2, 150, &second),
                transfer(3, 0, 3, 60, &third),
            ],
        );

        assert_eq!(balance(&h, 0, 0), Value::Long(40), "{policy}");
        assert_eq!(balance(&h, 0, 1), Value::Long(10), "{policy}");
        assert_eq!(balance(&h, 0, 2), Value::Long(250), "{policy}");
        assert_eq!(balance(&h, 0, 3), Value::Long(100), "{policy}");
        assert_eq!((first.get(), second.get(), third.get()), (2, 2, 0), "{policy}");
    }
}

#[test]
fn versions_are_folded_after_the_batch() {
    let h = harness(PolicyKind::Layered, 1, 8, DurabilityMode::None);
    let success = SuccessCounter::new();
    run_single(&h, vec![transfer(1, 0, 1, 30, &success)]);
    assert_eq!(h.store.version_count(record(0, 0)), 0);
    assert_eq!(h.store.version_count(record(0, 1)), 0);
}

// ============================================================================
// Access patterns
// ============================================================================

#[test]
fn write_only_overwrites() {
    let h = harness(PolicyKind::Layered, 1, 8, DurabilityMode::None);
    run_single(
        &h,
        vec![
            vec![Request::write_only(Bid(1), ACCOUNTS, PrimaryKey(2), 7i64)],
            vec![Request::read_write(Bid(2), ACCOUNTS, PrimaryKey(2), Inc(Value::Long(1)))],
        ],
    );
    assert_eq!(balance(&h, 0, 2), Value::Long(8));
}

#[test]
fn read_write_read_returns_new_value() {
    let h = harness(PolicyKind::Layered, 1, 8, DurabilityMode::None);
    let out = OutputSlot::new();
    let req = Request::new(Bid(1), AccessPattern::ReadWriteRead, ACCOUNTS, PrimaryKey(4))
        .with_function(Inc(Value::Long(25)))
        .with_output(out.clone());
    run_single(&h, vec![vec![req]]);
    assert_eq!(out.get(), Some(Value::Long(125)));
}

#[test]
fn cond_read_reports_current_value_on_failure() {
    let h = harness(PolicyKind::Layered, 1, 8, DurabilityMode::None);
    let out = OutputSlot::new();
    let req = Request::new(Bid(1), AccessPattern::ReadWriteCondRead, ACCOUNTS, PrimaryKey(3))
        .with_function(Dec(Value::Long(500)))
        .with_condition(Condition::greater_than(500))
        .with_source(ACCOUNTS, PrimaryKey(3))
        .with_success(SuccessCounter::new())
        .with_output(out.clone());
    run_single(&h, vec![vec![req]]);
    assert_eq!(out.get(), Some(Value::Long(100)));
    assert_eq!(balance(&h, 0, 3), Value::Long(100));
}

#[test]
fn aggregate_over_sources_in_other_partitions() {
    let h = harness(PolicyKind::Eager, 1, 8, DurabilityMode::None);
    h.store.insert(record(0, 5), Value::Long(40)).unwrap();
    h.store.insert(record(1, 6), Value::Long(80)).unwrap();
    let total = OutputSlot::new();
    let mean = OutputSlot::new();
    let sum = Request::new(Bid(2), AccessPattern::ReadWriteCondReadN, ACCOUNTS, PrimaryKey(0))
        .with_function(Sum)
        .with_source(ACCOUNTS, PrimaryKey(5))
        .with_source(BOOK_ENTRIES, PrimaryKey(6))
        .with_success(SuccessCounter::new())
        .with_output(total.clone());
    let avg = Request::new(Bid(3), AccessPattern::ReadWriteCondReadN, ACCOUNTS, PrimaryKey(1))
        .with_function(Avg)
        .with_source(ACCOUNTS, PrimaryKey(5))
        .with_source(BOOK_ENTRIES, PrimaryKey(6))
        .with_condition(Condition::greater_than(1000))
        .with_success(SuccessCounter::new())
        .with_output(mean.clone());
    // bid 1 raises the first source before either aggregate reads it
    let bump = Request::read_write(Bid(1), ACCOUNTS, PrimaryKey(5), Inc(Value::Long(10)));

    run_single(&h, vec![vec![sum], vec![avg], vec![bump]]);

    assert_eq!(total.get(), Some(Value::Long(130)));
    assert_eq!(balance(&h, 0, 0), Value::Long(130));
    // guard on the aggregate vetoes the write; the output keeps the old value
    assert_eq!(mean.get(), Some(Value::Long(100)));
    assert_eq!(balance(&h, 0, 1), Value::Long(100));
}

#[test]
fn running_average_vetoes_hot_samples() {
    let h = harness(PolicyKind::Layered, 1, 8, DurabilityMode::None);
    h.store.insert(record(0, 7), Value::Double(0.0)).unwrap();
    let sample = |bid, value| {
        Request::read_write(
            Bid(bid),
            ACCOUNTS,
            PrimaryKey(7),
            RunningAvg {
                sample: value,
                limit: 100.0,
            },
        )
    };
    run_single(&h, vec![vec![sample(1, 40.0)], vec![sample(2, 150.0)], vec![sample(3, 60.0)]]);
    assert_eq!(balance(&h, 0, 7), Value::Double(50.0));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn missing_guard_is_rejected_at_submission() {
    let h = harness(PolicyKind::Layered, 1, 8, DurabilityMode::None);
    let mut ctx = h.scheduler.register_context(0).unwrap();
    h.scheduler.txn_submit_begin(&mut ctx);
    let req = Request::new(Bid(1), AccessPattern::ReadWriteCond, ACCOUNTS, PrimaryKey(0))
        .with_function(Dec(Value::Long(1)))
        .with_source(ACCOUNTS, PrimaryKey(0))
        .with_success(SuccessCounter::new());
    let err = h.scheduler.submit_request(&mut ctx, req).unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidRequest(_)));
}

#[test]
fn key_outside_every_partition_is_rejected() {
    let h = harness(PolicyKind::Layered, 1, 8, DurabilityMode::None);
    let mut ctx = h.scheduler.register_context(0).unwrap();
    h.scheduler.txn_submit_begin(&mut ctx);
    let req = Request::read_write(Bid(1), ACCOUNTS, PrimaryKey(99), Inc(Value::Long(1)));
    h.scheduler.submit_request(&mut ctx, req).unwrap();
    let err = h.scheduler.txn_submit_finished(&mut ctx).unwrap_err();
    assert!(matches!(err, SchedulerError::PartitionMismatch { key: 99, .. }));
}

#[test]
fn unregistered_owner_is_rejected() {
    // two workers, only thread 0 registered: thread 1's keys are unreachable
    let h = harness(PolicyKind::Layered, 2, 8, DurabilityMode::None);
    let mut ctx = h.scheduler.register_context(0).unwrap();
    h.scheduler.txn_submit_begin(&mut ctx);
    let req = Request::read_write(Bid(1), ACCOUNTS, PrimaryKey(6), Inc(Value::Long(1)));
    h.scheduler.submit_request(&mut ctx, req).unwrap();
    assert!(matches!(
        h.scheduler.txn_submit_finished(&mut ctx),
        Err(SchedulerError::PartitionMismatch { .. })
    ));
}
