//! Concurrent readers and per-key writers on the memory store

use std::sync::Arc;
use std::thread;
use tpg_primitives::{Bid, PrimaryKey, RecordKey, TableId, Value};
use tpg_storage::{MemoryStore, RecordStore, TableCatalog};

fn key(k: u64) -> RecordKey {
    RecordKey::new(TableId(0), PrimaryKey(k))
}

#[test]
fn test_disjoint_writers_with_concurrent_readers() {
    let store = Arc::new(MemoryStore::new(TableCatalog::new(["t"]).unwrap()));
    for k in 0..8 {
        store.insert(key(k), Value::Long(0)).unwrap();
    }

    let mut handles = vec![];
    for t in 0..4u64 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for bid in 1..=100u64 {
                for k in [t * 2, t * 2 + 1] {
                    let prev = store.read_value_at(key(k), Bid(bid)).unwrap();
                    store
                        .write_value_at(key(k), Bid(bid), prev.add(&Value::Long(1)))
                        .unwrap();
                }
                // Read someone else's key while they write
                let other = key(((t + 1) % 4) * 2);
                let _ = store.read_value_at(other, Bid(bid)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for k in 0..8 {
        assert_eq!(store.current_value(key(k)).unwrap(), Value::Long(100));
    }
}
