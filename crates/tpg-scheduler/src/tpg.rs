//! Task precedence graph: chains, edges and levels

use crate::arena::OperationArena;
use crate::chain::{link, OperationChain};
use crate::error::{SchedulerError, SchedulerResult};
use crate::operation::Operation;
use crate::request::{resolve_key, resolve_transaction, Request};
use crate::types::{ChainId, DependencyType, Granularity, OpId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tpg_primitives::{Partitioner, PrimaryKey, RecordKey, ThreadId, TxnOpId};
use tpg_storage::TableCatalog;
use tracing::{debug, trace};

/// Check that every `(table, key)` of the store gets a [`ChainId`]
///
/// Chains cover the store's whole catalogue, which may hold more tables
/// than the configuration names.
pub(crate) fn check_chain_range(tables: usize, num_items: u64) -> SchedulerResult<()> {
    let chains = (tables as u64).checked_mul(num_items);
    if chains.map_or(true, |n| n > u32::MAX as u64) {
        return Err(SchedulerError::InvalidConfig(format!(
            "{} tables × {} items exceeds chain handle range",
            tables, num_items
        )));
    }
    Ok(())
}

/// The graph every worker builds into during submission
///
/// One chain exists per `(table, key)` for the whole run. A chain is
/// reachable only once the thread owning its key range has registered,
/// and is emptied at the end of every batch.
#[derive(Debug)]
pub struct TaskPrecedenceGraph {
    catalog: TableCatalog,
    partitioner: Partitioner,
    chains: Vec<OperationChain>,
    registry: DashMap<RecordKey, ChainId>,
    registered: Vec<AtomicBool>,
    touched: Vec<Mutex<Vec<ChainId>>>,
    arena: OperationArena,
}

impl TaskPrecedenceGraph {
    /// Allocate chains for every table and key
    pub fn new(catalog: TableCatalog, partitioner: Partitioner) -> SchedulerResult<Self> {
        let threads = partitioner.threads();
        let num_items = partitioner.num_items();
        check_chain_range(catalog.len(), num_items)?;
        let mut chains = Vec::with_capacity(catalog.len() * num_items as usize);
        for (table, _) in catalog.iter() {
            for key in 0..num_items {
                let key = PrimaryKey(key);
                let owner = partitioner
                    .owner(key)
                    .map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
                let id = ChainId(chains.len() as u32);
                chains.push(OperationChain::new(id, RecordKey::new(table, key), owner));
            }
        }
        debug!(chains = chains.len(), threads, "Task precedence graph allocated");
        Ok(Self {
            catalog,
            partitioner,
            chains,
            registry: DashMap::new(),
            registered: (0..threads).map(|_| AtomicBool::new(false)).collect(),
            touched: (0..threads).map(|_| Mutex::new(Vec::new())).collect(),
            arena: OperationArena::new(threads),
        })
    }

    /// Make a thread's key range reachable
    pub fn register_range(&self, thread: ThreadId) -> SchedulerResult<()> {
        let flag = self
            .registered
            .get(thread)
            .ok_or(SchedulerError::ContextNotRegistered(thread))?;
        for (table, _) in self.catalog.iter() {
            for key in self.partitioner.range(thread) {
                let record = RecordKey::new(table, PrimaryKey(key));
                self.registry.insert(record, self.chain_id(record));
            }
        }
        flag.store(true, Ordering::Release);
        debug!(thread, range = ?self.partitioner.range(thread), "Key range registered");
        Ok(())
    }

    /// Check if a thread registered its key range
    pub fn is_registered(&self, thread: ThreadId) -> bool {
        self.registered
            .get(thread)
            .map_or(false, |flag| flag.load(Ordering::Acquire))
    }

    fn chain_id(&self, key: RecordKey) -> ChainId {
        let index = key.table.index() as u64 * self.partitioner.num_items() + key.key.as_u64();
        ChainId(index as u32)
    }

    /// Chain of a record, if its partition is registered
    pub fn chain_of(&self, key: RecordKey) -> SchedulerResult<&OperationChain> {
        self.registry
            .get(&key)
            .map(|entry| *entry.value())
            .and_then(|id| self.chains.get(id.index()))
            .ok_or_else(|| SchedulerError::PartitionMismatch {
                table: self.catalog.name(key.table).unwrap_or("?").to_string(),
                key: key.key.as_u64(),
            })
    }

    /// Chain by handle
    pub fn chain(&self, id: ChainId) -> Option<&OperationChain> {
        self.chains.get(id.index())
    }

    /// Resolve a table name and key
    pub fn resolve(&self, table: &str, key: PrimaryKey) -> SchedulerResult<RecordKey> {
        resolve_key(&self.catalog, table, key)
    }

    /// Table catalogue
    pub fn catalog(&self) -> &TableCatalog {
        &self.catalog
    }

    /// Key partitioning
    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    /// Operation storage
    pub fn arena(&self) -> &OperationArena {
        &self.arena
    }

    /// Turn a transaction into operations and link them into the graph
    ///
    /// Nothing is allocated unless every request validates and maps to a
    /// registered partition.
    pub fn submit_transaction(
        &self,
        thread: ThreadId,
        requests: Vec<Request>,
    ) -> SchedulerResult<Vec<Arc<Operation>>> {
        let resolved = resolve_transaction(&self.catalog, requests)?;
        let mut placed = Vec::with_capacity(resolved.len());
        for request in resolved {
            let chain = self.chain_of(request.key)?;
            for source in &request.sources {
                self.chain_of(*source)?;
            }
            placed.push((chain.id(), chain.owner(), request));
        }

        let mut ops = Vec::with_capacity(placed.len());
        for (txn_op_id, (chain, owner, request)) in placed.into_iter().enumerate() {
            let op = self.arena.alloc(thread, |id| {
                Operation::new(id, txn_op_id as TxnOpId, chain, owner, request)
            })?;
            ops.push(op);
        }
        for op in &ops {
            self.submit(op)?;
        }
        self.link_logical(&ops);
        Ok(ops)
    }

    /// Place one operation on its chain and register it on its sources
    fn submit(&self, op: &Arc<Operation>) -> SchedulerResult<()> {
        let chain = self.chain_of(op.key())?;
        if chain.add_operation(op) {
            self.mark_touched(chain);
        }
        for source in op.sources() {
            if *source != op.key() {
                let source_chain = self.chain_of(*source)?;
                if source_chain.add_fd_dependent(op) {
                    self.mark_touched(source_chain);
                }
            }
        }
        trace!(op = %op.id(), bid = %op.bid(), key = %op.key(), "Operation submitted");
        Ok(())
    }

    fn mark_touched(&self, chain: &OperationChain) {
        if let Some(touched) = self.touched.get(chain.owner()) {
            touched.lock().push(chain.id());
        }
    }

    fn link_logical(&self, ops: &[Arc<Operation>]) {
        for pair in ops.windows(2) {
            link(DependencyType::Logical, &pair[0], &pair[1]);
        }
        if let Some((header, rest)) = ops.split_first() {
            header.set_descendants(rest.iter().map(|op| op.id()).collect());
        }
    }

    /// Chains owned by a thread that hold operations or consumers this batch
    pub fn touched_chains(&self, thread: ThreadId) -> Vec<ChainId> {
        self.touched
            .get(thread)
            .map(|touched| touched.lock().clone())
            .unwrap_or_default()
    }

    /// Add temporal edges on a thread's chains
    ///
    /// Must run once every thread finished submitting.
    pub fn link_temporal(&self, thread: ThreadId) {
        for id in self.touched_chains(thread) {
            if let Some(chain) = self.chain(id) {
                chain.link_temporal();
            }
        }
    }

    /// Level a thread's operations and arm their countdowns
    ///
    /// Returns one bucket per level. With [`Granularity::Operation`] an
    /// operation sits at its own level and buckets are ordered by
    /// `(bid, txn_op_id)`. With [`Granularity::Chain`] every operation sits
    /// at its chain's level, and a bucket lists whole chains in bid order,
    /// heaviest chain first. Must run once every thread linked its temporal
    /// edges.
    pub fn first_time_explore(&self, thread: ThreadId, granularity: Granularity) -> Vec<Vec<OpId>> {
        let chains: Vec<&OperationChain> = self
            .touched_chains(thread)
            .into_iter()
            .filter_map(|id| self.chain(id))
            .collect();
        for chain in &chains {
            chain.arm(&self.arena);
        }

        let mut buckets: Vec<Vec<(usize, ChainId, Arc<Operation>)>> = Vec::new();
        for chain in &chains {
            let chain_level = match granularity {
                Granularity::Operation => None,
                Granularity::Chain => Some(chain.update_dependency_level(self)),
            };
            let weight = chain.weight();
            for op in chain.operations() {
                op.arm_countdowns();
                let op_level = self.arena.dependency_level(op.id());
                let level = chain_level.unwrap_or(op_level) as usize;
                if buckets.len() <= level {
                    buckets.resize_with(level + 1, Vec::new);
                }
                buckets[level].push((weight, chain.id(), op));
            }
        }
        buckets
            .into_iter()
            .map(|mut bucket| {
                match granularity {
                    Granularity::Operation => {
                        bucket.sort_by_key(|(_, _, op)| (op.bid(), op.txn_op_id()))
                    }
                    Granularity::Chain => bucket.sort_by_key(|(weight, chain, op)| {
                        (Reverse(*weight), *chain, op.bid(), op.txn_op_id())
                    }),
                }
                bucket.into_iter().map(|(_, _, op)| op.id()).collect()
            })
            .collect()
    }

    /// Empty a thread's chains and arena shard
    ///
    /// Registry entries survive, so the key range stays reachable.
    pub fn reset(&self, thread: ThreadId) {
        if let Some(touched) = self.touched.get(thread) {
            for id in touched.lock().drain(..) {
                if let Some(chain) = self.chain(id) {
                    chain.clear();
                }
            }
        }
        self.arena.clear_shard(thread);
    }
}
