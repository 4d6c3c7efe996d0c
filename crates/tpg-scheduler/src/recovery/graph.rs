//! Recovery graph: chains carrying their own operations and shadows of
//! consumers waiting on them

use crate::arena::OperationArena;
use crate::error::{SchedulerError, SchedulerResult};
use crate::operation::Operation;
use crate::request::{resolve_transaction, Request};
use crate::tpg::check_chain_range;
use crate::types::{ChainId, OperationState};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use tpg_durability::{GroupId, LoggingManager};
use tpg_primitives::{Bid, Partitioner, RecordKey, ThreadId, TxnOpId};
use tpg_storage::{RecordStore, TableCatalog};

/// One slot in a recovery chain
#[derive(Debug)]
pub(crate) enum Entry {
    /// A consumer on another chain that may run once the cursor passes here
    Shadow {
        bid: Bid,
        consumer: Arc<Operation>,
    },
    /// An operation writing this chain's record
    Own(Arc<Operation>),
}

impl Entry {
    /// Shadows sort before own operations of the same bid, so a consumer
    /// sees exactly the writes of older transactions.
    fn order(&self) -> (Bid, u8, TxnOpId) {
        match self {
            Entry::Shadow { bid, consumer } => (*bid, 0, consumer.txn_op_id()),
            Entry::Own(op) => (op.bid(), 1, op.txn_op_id()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct RecoveryChain {
    pub key: RecordKey,
    pub owner: ThreadId,
    pub entries: Vec<Entry>,
    pub cursor: usize,
}

impl RecoveryChain {
    fn sort(&mut self) {
        self.entries.sort_by_key(Entry::order);
    }

    fn own_operations(&self) -> impl Iterator<Item = &Arc<Operation>> {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Own(op) => Some(op),
            Entry::Shadow { .. } => None,
        })
    }
}

/// Graph built while replaying logged input
///
/// Unlike the live graph, chains here are addressed directly by
/// partition arithmetic and consumers never hold edges: a consumer's
/// pending count drops as each source chain's cursor passes its shadow.
#[derive(Debug)]
pub struct RecoveryGraph {
    catalog: TableCatalog,
    partitioner: Partitioner,
    chains: Vec<Mutex<RecoveryChain>>,
    touched: Vec<Mutex<Vec<ChainId>>>,
    arena: OperationArena,
}

impl RecoveryGraph {
    /// Allocate chains for every table and key
    pub fn new(catalog: TableCatalog, partitioner: Partitioner) -> SchedulerResult<Self> {
        let threads = partitioner.threads();
        check_chain_range(catalog.len(), partitioner.num_items())?;
        let mut chains = Vec::with_capacity(catalog.len() * partitioner.num_items() as usize);
        for (table, _) in catalog.iter() {
            for key in 0..partitioner.num_items() {
                let key = tpg_primitives::PrimaryKey(key);
                let owner = partitioner
                    .owner(key)
                    .map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
                chains.push(Mutex::new(RecoveryChain {
                    key: RecordKey::new(table, key),
                    owner,
                    entries: Vec::new(),
                    cursor: 0,
                }));
            }
        }
        Ok(Self {
            catalog,
            partitioner,
            chains,
            touched: (0..threads).map(|_| Mutex::new(Vec::new())).collect(),
            arena: OperationArena::new(threads),
        })
    }

    /// Operation storage
    pub fn arena(&self) -> &OperationArena {
        &self.arena
    }

    /// Chain handle of a record
    pub fn chain_id(&self, key: RecordKey) -> SchedulerResult<ChainId> {
        let mismatch = || SchedulerError::PartitionMismatch {
            table: self.catalog.name(key.table).unwrap_or("?").to_string(),
            key: key.key.as_u64(),
        };
        if key.table.index() >= self.catalog.len() {
            return Err(mismatch());
        }
        self.partitioner.owner(key.key).map_err(|_| mismatch())?;
        let index = key.table.index() as u64 * self.partitioner.num_items() + key.key.as_u64();
        Ok(ChainId(index as u32))
    }

    pub(crate) fn chain(&self, id: ChainId) -> Option<&Mutex<RecoveryChain>> {
        self.chains.get(id.index())
    }

    /// Record of a chain
    pub fn chain_key(&self, id: ChainId) -> Option<RecordKey> {
        self.chain(id).map(|chain| chain.lock().key)
    }

    /// Chains owned by a thread that hold entries this batch
    pub fn touched_chains(&self, thread: ThreadId) -> Vec<ChainId> {
        self.touched
            .get(thread)
            .map(|touched| touched.lock().clone())
            .unwrap_or_default()
    }

    fn push_entry(&self, id: ChainId, entry: Entry) -> SchedulerResult<()> {
        let chain = self.chain(id).ok_or(SchedulerError::InvalidConfig(format!(
            "chain {} out of range",
            id.0
        )))?;
        let mut chain = chain.lock();
        if chain.entries.is_empty() {
            if let Some(touched) = self.touched.get(chain.owner) {
                touched.lock().push(id);
            }
        }
        chain.entries.push(entry);
        Ok(())
    }

    /// Add a transaction's operations to their chains
    pub fn submit_transaction(
        &self,
        thread: ThreadId,
        requests: Vec<Request>,
    ) -> SchedulerResult<Vec<Arc<Operation>>> {
        let resolved = resolve_transaction(&self.catalog, requests)?;
        let mut placed = Vec::with_capacity(resolved.len());
        for request in resolved {
            let chain = self.chain_id(request.key)?;
            for source in &request.sources {
                self.chain_id(*source)?;
            }
            let owner = self.partitioner.owner(request.key.key).unwrap_or(thread);
            placed.push((chain, owner, request));
        }
        let mut ops = Vec::with_capacity(placed.len());
        for (txn_op_id, (chain, owner, request)) in placed.into_iter().enumerate() {
            let op = self.arena.alloc(thread, |id| {
                Operation::new(id, txn_op_id as TxnOpId, chain, owner, request)
            })?;
            self.push_entry(chain, Entry::Own(Arc::clone(&op)))?;
            ops.push(op);
        }
        Ok(ops)
    }

    /// Resolve how a consumer learns its source values
    ///
    /// A value recorded in the history views is preset on the operation;
    /// otherwise a shadow goes on the source chain and the operation waits
    /// for it.
    pub fn inspect_dependencies(
        &self,
        op: &Arc<Operation>,
        group: GroupId,
        history_view: bool,
        logging: &dyn LoggingManager,
    ) -> SchedulerResult<()> {
        for source in op.sources() {
            if *source == op.key() {
                continue;
            }
            if history_view {
                if let Some(value) =
                    logging.inspect_dependency_view(group, op.key(), *source, op.bid())
                {
                    op.preset_source(*source, value);
                    continue;
                }
            }
            let chain = self.chain_id(*source)?;
            self.push_entry(
                chain,
                Entry::Shadow {
                    bid: op.bid(),
                    consumer: Arc::clone(op),
                },
            )?;
            op.add_pending_dependency();
        }
        Ok(())
    }

    /// Order chain entries and arm their operations
    pub fn prepare(&self, chains: &[ChainId]) {
        for id in chains {
            if let Some(chain) = self.chain(*id) {
                let mut chain = chain.lock();
                chain.sort();
                chain.cursor = 0;
                for op in chain.own_operations() {
                    op.rearm_pending_dependencies();
                }
            }
        }
    }

    /// Undo a pass: abort failed transactions, remove every version the
    /// pass wrote and rewind the chains
    pub fn rewind(
        &self,
        chains: &[ChainId],
        failed: &BTreeSet<Bid>,
        store: &dyn RecordStore,
    ) -> SchedulerResult<()> {
        for id in chains {
            let Some(chain) = self.chain(*id) else {
                continue;
            };
            let mut chain = chain.lock();
            for op in chain.own_operations() {
                let state = op.state();
                if state == OperationState::Executed {
                    store.remove_version(op.key(), op.bid())?;
                    op.revert_success();
                }
                if failed.contains(&op.bid()) {
                    op.set_state(OperationState::Aborted);
                } else if state != OperationState::Aborted {
                    op.set_state(OperationState::Blocked);
                }
                op.rearm_pending_dependencies();
            }
            chain.cursor = 0;
        }
        Ok(())
    }

    /// Empty a thread's chains and arena shard; returns the records its
    /// chains wrote
    pub fn reset(&self, thread: ThreadId) -> Vec<RecordKey> {
        let mut written = Vec::new();
        if let Some(touched) = self.touched.get(thread) {
            for id in touched.lock().drain(..) {
                if let Some(chain) = self.chain(id) {
                    let mut chain = chain.lock();
                    if chain.own_operations().next().is_some() {
                        written.push(chain.key);
                    }
                    chain.entries.clear();
                    chain.cursor = 0;
                }
            }
        }
        self.arena.clear_shard(thread);
        written
    }
}
