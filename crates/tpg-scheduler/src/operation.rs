//! Operations: one record write of one transaction

use crate::function::{Condition, Function, OutputSlot, SuccessCounter};
use crate::request::ResolvedRequest;
use crate::types::{AccessPattern, ChainId, DependencyType, OpId, OperationState};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tpg_primitives::{Bid, RecordKey, ThreadId, TxnOpId, Value};

const LEVEL_UNSET: u32 = u32::MAX;
const NOT_EXECUTED: u64 = u64::MAX;

#[derive(Debug, Default)]
struct Edges {
    parents: [Vec<OpId>; 3],
    children: [Vec<OpId>; 3],
}

/// One operation in the task precedence graph
///
/// Immutable request data plus the mutable scheduling state, all behind
/// atomics or short-lived locks so any worker can resolve its countdowns.
pub struct Operation {
    id: OpId,
    bid: Bid,
    txn_op_id: TxnOpId,
    key: RecordKey,
    chain: ChainId,
    owner: ThreadId,
    pattern: AccessPattern,
    function: Option<Arc<dyn Function>>,
    condition: Option<Condition>,
    sources: Vec<RecordKey>,
    value: Option<Value>,
    success: Option<SuccessCounter>,
    output: Option<OutputSlot>,

    state: AtomicU8,
    failed: AtomicBool,
    succeeded: AtomicBool,
    notified: AtomicBool,
    committed: AtomicBool,
    level: AtomicU32,
    pending: [AtomicU32; 3],
    pending_total: AtomicU32,
    pd_total: AtomicU32,
    pd_count: AtomicU32,
    executions: AtomicU32,
    executed_at: AtomicU64,

    edges: Mutex<Edges>,
    consumed: Mutex<Vec<(RecordKey, Value)>>,
    history: Mutex<Vec<(RecordKey, Value)>>,
    written: Mutex<Option<Value>>,
    descendants: Mutex<Vec<OpId>>,
}

impl Operation {
    pub(crate) fn new(
        id: OpId,
        txn_op_id: TxnOpId,
        chain: ChainId,
        owner: ThreadId,
        resolved: ResolvedRequest,
    ) -> Self {
        let ResolvedRequest {
            key,
            sources,
            request,
        } = resolved;
        Self {
            id,
            bid: request.bid,
            txn_op_id,
            key,
            chain,
            owner,
            pattern: request.pattern,
            function: request.function,
            condition: request.condition,
            sources,
            value: request.value,
            success: request.success,
            output: request.output,
            state: AtomicU8::new(OperationState::Blocked as u8),
            failed: AtomicBool::new(false),
            succeeded: AtomicBool::new(false),
            notified: AtomicBool::new(false),
            committed: AtomicBool::new(false),
            level: AtomicU32::new(LEVEL_UNSET),
            pending: std::array::from_fn(|_| AtomicU32::new(0)),
            pending_total: AtomicU32::new(0),
            pd_total: AtomicU32::new(0),
            pd_count: AtomicU32::new(0),
            executions: AtomicU32::new(0),
            executed_at: AtomicU64::new(NOT_EXECUTED),
            edges: Mutex::new(Edges::default()),
            consumed: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            written: Mutex::new(None),
            descendants: Mutex::new(Vec::new()),
        }
    }

    /// Handle
    pub fn id(&self) -> OpId {
        self.id
    }

    /// Transaction batch id
    pub fn bid(&self) -> Bid {
        self.bid
    }

    /// Position inside the transaction
    pub fn txn_op_id(&self) -> TxnOpId {
        self.txn_op_id
    }

    /// Destination record
    pub fn key(&self) -> RecordKey {
        self.key
    }

    /// Chain holding the operation
    pub fn chain(&self) -> ChainId {
        self.chain
    }

    /// Thread owning the destination partition
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    /// Access pattern
    pub fn pattern(&self) -> AccessPattern {
        self.pattern
    }

    /// Function, absent for write-only operations
    pub fn function(&self) -> Option<&Arc<dyn Function>> {
        self.function.as_ref()
    }

    /// Guard
    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// Source records, deduplicated
    pub fn sources(&self) -> &[RecordKey] {
        &self.sources
    }

    /// Static value of a write-only operation
    pub fn static_value(&self) -> Option<Value> {
        self.value
    }

    pub(crate) fn success(&self) -> Option<&SuccessCounter> {
        self.success.as_ref()
    }

    pub(crate) fn output(&self) -> Option<&OutputSlot> {
        self.output.as_ref()
    }

    /// Current state
    pub fn state(&self) -> OperationState {
        OperationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: OperationState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn mark_executed(&self, seq: u64) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.executed_at.store(seq, Ordering::Relaxed);
        self.set_state(OperationState::Executed);
    }

    /// Move to ABORTED, returning the previous state
    pub(crate) fn mark_aborted(&self) -> OperationState {
        OperationState::from_u8(
            self.state
                .swap(OperationState::Aborted as u8, Ordering::AcqRel),
        )
    }

    /// Check if the guard vetoed the write
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn set_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    pub(crate) fn set_succeeded(&self) {
        self.succeeded.store(true, Ordering::Release);
    }

    /// Undo this operation's contribution to the success counter
    pub(crate) fn revert_success(&self) {
        if self.succeeded.swap(false, Ordering::AcqRel) {
            if let Some(success) = &self.success {
                success.decrement();
            }
        }
    }

    /// Claim the right to notify children; true exactly once
    pub(crate) fn begin_notify(&self) -> bool {
        !self.notified.swap(true, Ordering::AcqRel)
    }

    /// Claim the right to log this operation; true exactly once
    pub(crate) fn begin_commit(&self) -> bool {
        !self.committed.swap(true, Ordering::AcqRel)
    }

    /// Dependency level, once computed
    pub fn level(&self) -> Option<u32> {
        match self.level.load(Ordering::Acquire) {
            LEVEL_UNSET => None,
            level => Some(level),
        }
    }

    pub(crate) fn set_level(&self, level: u32) {
        self.level.store(level, Ordering::Release);
    }

    // ==== Edges ====

    pub(crate) fn add_parent(&self, kind: DependencyType, parent: OpId) {
        let mut edges = self.edges.lock();
        let list = &mut edges.parents[kind.index()];
        if !list.contains(&parent) {
            list.push(parent);
        }
    }

    pub(crate) fn add_child(&self, kind: DependencyType, child: OpId) {
        let mut edges = self.edges.lock();
        let list = &mut edges.children[kind.index()];
        if !list.contains(&child) {
            list.push(child);
        }
    }

    pub(crate) fn remove_parent(&self, kind: DependencyType, parent: OpId) {
        self.edges.lock().parents[kind.index()].retain(|id| *id != parent);
    }

    pub(crate) fn remove_child(&self, kind: DependencyType, child: OpId) {
        self.edges.lock().children[kind.index()].retain(|id| *id != child);
    }

    /// Parents of one kind
    pub fn parents(&self, kind: DependencyType) -> Vec<OpId> {
        self.edges.lock().parents[kind.index()].clone()
    }

    /// Children of one kind
    pub fn children(&self, kind: DependencyType) -> Vec<OpId> {
        self.edges.lock().children[kind.index()].clone()
    }

    /// Parents of every kind
    pub fn all_parents(&self) -> Vec<OpId> {
        let edges = self.edges.lock();
        edges.parents.iter().flatten().copied().collect()
    }

    // ==== Countdowns ====

    /// Load countdowns from the edge lists; READY when there are none
    pub(crate) fn arm_countdowns(&self) {
        let edges = self.edges.lock();
        let mut total = 0;
        for kind in DependencyType::ALL {
            let n = edges.parents[kind.index()].len() as u32;
            self.pending[kind.index()].store(n, Ordering::Release);
            total += n;
        }
        self.pending_total.store(total, Ordering::Release);
        let state = if total == 0 {
            OperationState::Ready
        } else {
            OperationState::Blocked
        };
        self.set_state(state);
    }

    /// Resolve one parent; true when this made the operation READY
    pub(crate) fn resolve_parent(&self, kind: DependencyType) -> bool {
        let slot = &self.pending[kind.index()];
        if slot
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            return false;
        }
        let before = self.pending_total.fetch_sub(1, Ordering::AcqRel);
        before == 1
            && self
                .state
                .compare_exchange(
                    OperationState::Blocked as u8,
                    OperationState::Ready as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
    }

    /// Unresolved parents of one kind
    pub fn pending(&self, kind: DependencyType) -> u32 {
        self.pending[kind.index()].load(Ordering::Acquire)
    }

    /// Unresolved parents of every kind
    pub fn pending_total(&self) -> u32 {
        self.pending_total.load(Ordering::Acquire)
    }

    // ==== Recovery countdown ====

    pub(crate) fn add_pending_dependency(&self) {
        self.pd_total.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn rearm_pending_dependencies(&self) {
        self.pd_count
            .store(self.pd_total.load(Ordering::Acquire), Ordering::Release);
    }

    pub(crate) fn resolve_pending_dependency(&self) {
        let _ = self
            .pd_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Source chains still to reach this operation during replay
    pub fn pending_dependencies(&self) -> u32 {
        self.pd_count.load(Ordering::Acquire)
    }

    // ==== Values ====

    pub(crate) fn record_consumed(&self, source: RecordKey, value: Value) {
        let mut consumed = self.consumed.lock();
        match consumed.iter_mut().find(|(key, _)| *key == source) {
            Some(slot) => slot.1 = value,
            None => consumed.push((source, value)),
        }
    }

    /// Source values read on the last execution
    pub fn consumed(&self) -> Vec<(RecordKey, Value)> {
        self.consumed.lock().clone()
    }

    pub(crate) fn preset_source(&self, source: RecordKey, value: Value) {
        self.history.lock().push((source, value));
    }

    pub(crate) fn preset_value(&self, source: RecordKey) -> Option<Value> {
        self.history
            .lock()
            .iter()
            .find(|(key, _)| *key == source)
            .map(|(_, value)| *value)
    }

    pub(crate) fn set_written(&self, value: Option<Value>) {
        *self.written.lock() = value;
    }

    /// Value this operation wrote on its last execution
    pub fn written(&self) -> Option<Value> {
        *self.written.lock()
    }

    pub(crate) fn set_descendants(&self, descendants: Vec<OpId>) {
        *self.descendants.lock() = descendants;
    }

    /// Later operations of the transaction, recorded on its first operation
    pub fn descendants(&self) -> Vec<OpId> {
        self.descendants.lock().clone()
    }

    /// Number of times the function ran
    pub fn executions(&self) -> u32 {
        self.executions.load(Ordering::Relaxed)
    }

    /// Global execution sequence number of the last run
    pub fn executed_at(&self) -> Option<u64> {
        match self.executed_at.load(Ordering::Relaxed) {
            NOT_EXECUTED => None,
            seq => Some(seq),
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("bid", &self.bid)
            .field("txn_op_id", &self.txn_op_id)
            .field("key", &self.key)
            .field("pattern", &self.pattern)
            .field("state", &self.state())
            .field("level", &self.level())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::Inc;
    use crate::request::Request;
    use tpg_primitives::{PrimaryKey, TableId};

    fn op(index: usize) -> Operation {
        let key = RecordKey::new(TableId(0), PrimaryKey(index as u64));
        let request = Request::read_write(Bid(1), "accounts", key.key, Inc(Value::Long(1)));
        Operation::new(
            OpId::new(0, index),
            0,
            ChainId(index as u32),
            0,
            ResolvedRequest {
                key,
                sources: Vec::new(),
                request,
            },
        )
    }

    #[test]
    fn test_arm_without_parents_is_ready() {
        let a = op(0);
        a.arm_countdowns();
        assert_eq!(a.state(), OperationState::Ready);
        assert_eq!(a.pending_total(), 0);
    }

    #[test]
    fn test_ready_after_every_kind_resolved() {
        let a = op(0);
        a.add_parent(DependencyType::Temporal, OpId::new(0, 1));
        a.add_parent(DependencyType::Functional, OpId::new(0, 2));
        a.add_parent(DependencyType::Functional, OpId::new(0, 2));
        a.arm_countdowns();
        assert_eq!(a.state(), OperationState::Blocked);
        assert_eq!(a.pending(DependencyType::Functional), 1);

        assert!(!a.resolve_parent(DependencyType::Temporal));
        assert!(!a.resolve_parent(DependencyType::Logical));
        assert_eq!(a.pending_total(), 1);
        assert!(a.resolve_parent(DependencyType::Functional));
        assert_eq!(a.state(), OperationState::Ready);
    }

    #[test]
    fn test_aborted_is_not_revived_by_countdown() {
        let a = op(0);
        a.add_parent(DependencyType::Logical, OpId::new(0, 1));
        a.arm_countdowns();
        a.mark_aborted();
        assert!(!a.resolve_parent(DependencyType::Logical));
        assert_eq!(a.state(), OperationState::Aborted);
    }

    #[test]
    fn test_notify_and_commit_claimed_once() {
        let a = op(0);
        assert!(a.begin_notify());
        assert!(!a.begin_notify());
        assert!(a.begin_commit());
        assert!(!a.begin_commit());
    }

    #[test]
    fn test_remove_edges() {
        let a = op(0);
        a.add_child(DependencyType::Functional, OpId::new(0, 3));
        a.remove_child(DependencyType::Functional, OpId::new(0, 3));
        assert!(a.children(DependencyType::Functional).is_empty());
    }
}
