//! Operation chains: every operation writing one record, in bid order

use crate::arena::OperationArena;
use crate::operation::Operation;
use crate::tpg::TaskPrecedenceGraph;
use crate::types::{ChainId, DependencyType};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tpg_primitives::{RecordKey, ThreadId};

/// Edge kinds that cross from one chain to another
const CROSS_CHAIN: [DependencyType; 2] = [DependencyType::Functional, DependencyType::Logical];

/// A consumer registered on this chain's record
#[derive(Debug)]
struct FdRegistration {
    consumer: Arc<Operation>,
    /// Latest operation on this chain older than the consumer
    producer: Option<Arc<Operation>>,
}

#[derive(Debug, Default)]
struct ChainInner {
    ops: Vec<Arc<Operation>>,
    dependents: Vec<FdRegistration>,
    level: Option<u32>,
    /// Chains holding a parent of one of this chain's operations
    parents: Option<Vec<ChainId>>,
    /// Edges from this chain's operations into other chains
    dependent_edges: usize,
}

impl ChainInner {
    fn is_untouched(&self) -> bool {
        self.ops.is_empty() && self.dependents.is_empty()
    }
}

/// Operations on one `(table, key)`, ordered by `(bid, txn_op_id)`
///
/// Also tracks the operations on other chains that read this record, so a
/// producer that arrives after its consumer still gets the functional edge.
///
/// Once armed for a batch the chain counts the functional and logical
/// edges linking it to other chains that have not resolved yet: edges
/// into its operations and edges out of them.
#[derive(Debug)]
pub struct OperationChain {
    id: ChainId,
    key: RecordKey,
    owner: ThreadId,
    inner: Mutex<ChainInner>,
    outstanding_parents: AtomicUsize,
    outstanding_dependents: AtomicUsize,
}

pub(crate) fn link(kind: DependencyType, parent: &Operation, child: &Operation) {
    parent.add_child(kind, child.id());
    child.add_parent(kind, parent.id());
}

fn unlink(kind: DependencyType, parent: &Operation, child: &Operation) {
    parent.remove_child(kind, child.id());
    child.remove_parent(kind, parent.id());
}

impl OperationChain {
    /// Create an empty chain
    pub fn new(id: ChainId, key: RecordKey, owner: ThreadId) -> Self {
        Self {
            id,
            key,
            owner,
            inner: Mutex::new(ChainInner::default()),
            outstanding_parents: AtomicUsize::new(0),
            outstanding_dependents: AtomicUsize::new(0),
        }
    }

    /// Handle
    pub fn id(&self) -> ChainId {
        self.id
    }

    /// Record the chain writes
    pub fn key(&self) -> RecordKey {
        self.key
    }

    /// Thread owning the record's partition
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Insert an operation in bid order; true if the chain was untouched
    ///
    /// Any registered consumer younger than the newcomer whose producer is
    /// older (or missing) is re-pointed at the newcomer.
    pub(crate) fn add_operation(&self, op: &Arc<Operation>) -> bool {
        let mut inner = self.inner.lock();
        let untouched = inner.is_untouched();
        let order = (op.bid(), op.txn_op_id());
        let pos = inner
            .ops
            .partition_point(|o| (o.bid(), o.txn_op_id()) < order);
        inner.ops.insert(pos, Arc::clone(op));

        for reg in inner.dependents.iter_mut() {
            let newer = reg
                .producer
                .as_ref()
                .map_or(true, |producer| producer.bid() < op.bid());
            if reg.consumer.bid() > op.bid() && newer {
                if let Some(old) = reg.producer.take() {
                    unlink(DependencyType::Functional, &old, &reg.consumer);
                }
                link(DependencyType::Functional, op, &reg.consumer);
                reg.producer = Some(Arc::clone(op));
            }
        }
        untouched
    }

    /// Register a consumer reading this chain's record
    ///
    /// Links it to the latest operation older than the consumer, if any.
    /// Returns true if the chain was untouched.
    pub(crate) fn add_fd_dependent(&self, consumer: &Arc<Operation>) -> bool {
        let mut inner = self.inner.lock();
        let untouched = inner.is_untouched();
        let producer = inner
            .ops
            .iter()
            .rev()
            .find(|o| o.bid() < consumer.bid())
            .cloned();
        if let Some(producer) = &producer {
            link(DependencyType::Functional, producer, consumer);
        }
        inner.dependents.push(FdRegistration {
            consumer: Arc::clone(consumer),
            producer,
        });
        untouched
    }

    /// Add temporal edges between consecutive operations
    pub(crate) fn link_temporal(&self) {
        let inner = self.inner.lock();
        for pair in inner.ops.windows(2) {
            link(DependencyType::Temporal, &pair[0], &pair[1]);
        }
    }

    /// Parent chains and the edge counts across chain boundaries
    fn cross_chain_links(&self, arena: &OperationArena) -> (Vec<ChainId>, usize, usize) {
        let mut parents = BTreeSet::new();
        let mut parent_edges = 0;
        let mut dependent_edges = 0;
        for op in self.operations() {
            for kind in CROSS_CHAIN {
                for parent in op.parents(kind).into_iter().filter_map(|id| arena.get(id)) {
                    if parent.chain() != self.id {
                        parents.insert(parent.chain());
                        parent_edges += 1;
                    }
                }
                dependent_edges += op
                    .children(kind)
                    .into_iter()
                    .filter_map(|id| arena.get(id))
                    .filter(|child| child.chain() != self.id)
                    .count();
            }
        }
        (parents.into_iter().collect(), parent_edges, dependent_edges)
    }

    /// Arm the cross-chain edge counters
    ///
    /// Must run once every thread finished submitting, and before any
    /// operation of the batch executes.
    pub(crate) fn arm(&self, arena: &OperationArena) {
        let (parents, parent_edges, dependent_edges) = self.cross_chain_links(arena);
        {
            let mut inner = self.inner.lock();
            inner.parents.get_or_insert(parents);
            inner.dependent_edges = dependent_edges;
        }
        self.outstanding_parents.store(parent_edges, Ordering::Release);
        self.outstanding_dependents.store(dependent_edges, Ordering::Release);
    }

    /// Chains holding a parent of one of this chain's operations
    pub fn parent_chains(&self, arena: &OperationArena) -> Vec<ChainId> {
        if let Some(parents) = &self.inner.lock().parents {
            return parents.clone();
        }
        let (parents, _, _) = self.cross_chain_links(arena);
        self.inner.lock().parents.get_or_insert(parents).clone()
    }

    /// Level of the chain: 0 without parent chains, otherwise one more than
    /// its highest parent chain
    ///
    /// Memoised, so a second call is free. Chains on a dependency cycle are
    /// levelled by ignoring the edge that closes the cycle; operation
    /// countdowns still order their execution.
    pub(crate) fn update_dependency_level(&self, graph: &TaskPrecedenceGraph) -> u32 {
        if let Some(level) = self.dependency_level() {
            return level;
        }
        let mut expanding = HashSet::new();
        let mut stack = vec![(self.id, false)];
        while let Some((id, expanded)) = stack.pop() {
            let Some(chain) = graph.chain(id) else {
                continue;
            };
            if chain.dependency_level().is_some() {
                continue;
            }
            let parents = chain.parent_chains(graph.arena());
            if expanded {
                let level = parents
                    .iter()
                    .filter_map(|p| graph.chain(*p))
                    .filter_map(|p| p.dependency_level())
                    .map(|l| l + 1)
                    .max()
                    .unwrap_or(0);
                chain.set_dependency_level(level);
                expanding.remove(&id);
            } else if expanding.insert(id) {
                stack.push((id, true));
                for parent in parents {
                    if !expanding.contains(&parent) {
                        stack.push((parent, false));
                    }
                }
            }
        }
        self.dependency_level().unwrap_or(0)
    }

    /// Level, once computed
    pub fn dependency_level(&self) -> Option<u32> {
        self.inner.lock().level
    }

    /// First writer wins
    fn set_dependency_level(&self, level: u32) {
        let mut inner = self.inner.lock();
        if inner.level.is_none() {
            inner.level = Some(level);
        }
    }

    /// Unresolved edges into this chain from other chains
    pub fn outstanding_parents(&self) -> usize {
        self.outstanding_parents.load(Ordering::Acquire)
    }

    /// Unresolved edges from this chain into other chains
    pub fn outstanding_dependents(&self) -> usize {
        self.outstanding_dependents.load(Ordering::Acquire)
    }

    pub(crate) fn resolve_parent_edge(&self) {
        let _ = self
            .outstanding_parents
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub(crate) fn resolve_dependent_edge(&self) {
        let _ = self
            .outstanding_dependents
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Operations plus edges into other chains, as armed
    pub fn weight(&self) -> usize {
        let inner = self.inner.lock();
        inner.ops.len() + inner.dependent_edges
    }

    /// Operations in bid order
    pub fn operations(&self) -> Vec<Arc<Operation>> {
        self.inner.lock().ops.clone()
    }

    /// Consumers registered on this record
    pub fn dependent_count(&self) -> usize {
        self.inner.lock().dependents.len()
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.inner.lock().ops.len()
    }

    /// Check if the chain holds no operations
    pub fn is_empty(&self) -> bool {
        self.inner.lock().ops.is_empty()
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.ops.clear();
        inner.dependents.clear();
        inner.level = None;
        inner.parents = None;
        inner.dependent_edges = 0;
        self.outstanding_parents.store(0, Ordering::Release);
        self.outstanding_dependents.store(0, Ordering::Release);
    }
}
