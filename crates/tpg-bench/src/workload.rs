//! Streaming-ledger workload generator

use crate::config::WorkloadConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tpg_primitives::{Bid, PrimaryKey, Value};
use tpg_scheduler::{AccessPattern, Condition, Dec, Inc, Request, SuccessCounter};

/// Ledger table holding account balances
pub const ACCOUNTS: &str = "accounts";
/// Ledger table holding book entries
pub const BOOK_ENTRIES: &str = "book_entries";

/// One input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Credit an account and its book entry
    Deposit {
        /// Batch id
        bid: u64,
        /// Credited key
        key: u64,
        /// Amount
        amount: i64,
    },
    /// Move funds between two keys in both tables, if the source account
    /// covers the amount
    Transfer {
        /// Batch id
        bid: u64,
        /// Debited key
        src: u64,
        /// Credited key
        dst: u64,
        /// Amount
        amount: i64,
    },
}

impl Event {
    /// Batch id of the event
    pub fn bid(&self) -> u64 {
        match self {
            Event::Deposit { bid, .. } | Event::Transfer { bid, .. } => *bid,
        }
    }

    /// Requests of the event's transaction
    ///
    /// Every transfer leg is guarded on the source account, so a transfer
    /// applies all four writes or none.
    pub fn requests(&self) -> Vec<Request> {
        match *self {
            Event::Deposit { bid, key, amount } => [ACCOUNTS, BOOK_ENTRIES]
                .into_iter()
                .map(|table| {
                    Request::read_write(Bid(bid), table, PrimaryKey(key), Inc(Value::Long(amount)))
                })
                .collect(),
            Event::Transfer {
                bid,
                src,
                dst,
                amount,
            } => {
                let success = SuccessCounter::new();
                let mut requests = Vec::with_capacity(4);
                for table in [ACCOUNTS, BOOK_ENTRIES] {
                    for (key, debit) in [(src, true), (dst, false)] {
                        let request =
                            Request::new(Bid(bid), AccessPattern::ReadWriteCond, table, PrimaryKey(key))
                                .with_condition(Condition::greater_than(amount))
                                .with_source(ACCOUNTS, PrimaryKey(src))
                                .with_success(success.clone());
                        requests.push(if debit {
                            request.with_function(Dec(Value::Long(amount)))
                        } else {
                            request.with_function(Inc(Value::Long(amount)))
                        });
                    }
                }
                requests
            }
        }
    }
}

/// Events of one batch, split across submitting threads
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Group marker the batch commits under
    pub marker: u64,
    /// `per_thread[t]` is submitted by thread `t`
    pub per_thread: Vec<Vec<Event>>,
}

impl Batch {
    /// Number of events
    pub fn event_count(&self) -> usize {
        self.per_thread.iter().map(Vec::len).sum()
    }
}

/// Generate every batch of the run
///
/// Bids increase by one per event across the whole run; events are dealt
/// round-robin to threads. The same seed always gives the same workload.
pub fn generate(config: &WorkloadConfig, threads: usize, num_items: u64) -> Vec<Batch> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut bid = 1;
    (0..config.batches)
        .map(|b| {
            let mut per_thread = vec![Vec::new(); threads];
            for i in 0..config.batch_size {
                let amount = rng.gen_range(1..=config.max_amount);
                let event = if num_items > 1 && rng.gen_bool(config.transfer_ratio) {
                    let src = rng.gen_range(0..num_items);
                    let dst = (src + rng.gen_range(1..num_items)) % num_items;
                    Event::Transfer {
                        bid,
                        src,
                        dst,
                        amount,
                    }
                } else {
                    Event::Deposit {
                        bid,
                        key: rng.gen_range(0..num_items),
                        amount,
                    }
                };
                per_thread[i % threads].push(event);
                bid += 1;
            }
            Batch {
                marker: b as u64,
                per_thread,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WorkloadConfig {
        WorkloadConfig {
            batches: 3,
            batch_size: 10,
            seed: 42,
            ..WorkloadConfig::default()
        }
    }

    #[test]
    fn test_generate_is_deterministic() {
        assert_eq!(generate(&config(), 4, 100), generate(&config(), 4, 100));
    }

    #[test]
    fn test_bids_are_unique_and_increasing() {
        let batches = generate(&config(), 4, 100);
        let mut bids: Vec<u64> = batches
            .iter()
            .flat_map(|b| b.per_thread.iter().flatten().map(Event::bid))
            .collect();
        bids.sort_unstable();
        assert_eq!(bids, (1..=30).collect::<Vec<_>>());
        assert!(batches.iter().all(|b| b.event_count() == 10));
        assert_eq!(batches[2].marker, 2);
    }

    #[test]
    fn test_transfer_never_targets_its_source() {
        let config = WorkloadConfig {
            transfer_ratio: 1.0,
            ..config()
        };
        for batch in generate(&config, 2, 3) {
            for event in batch.per_thread.iter().flatten() {
                let Event::Transfer { src, dst, .. } = event else {
                    panic!("expected only transfers");
                };
                assert_ne!(src, dst);
            }
        }
    }

    #[test]
    fn test_event_requests() {
        let deposit = Event::Deposit {
            bid: 1,
            key: 3,
            amount: 5,
        };
        let requests = deposit.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.pattern == AccessPattern::ReadWrite));

        let transfer = Event::Transfer {
            bid: 2,
            src: 0,
            dst: 1,
            amount: 5,
        };
        let requests = transfer.requests();
        assert_eq!(requests.len(), 4);
        for request in &requests {
            request.validate().unwrap();
            assert_eq!(request.sources, vec![(ACCOUNTS.to_string(), PrimaryKey(0))]);
        }
    }
}
