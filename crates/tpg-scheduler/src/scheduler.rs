//! The batch engine

use crate::abort::{FailureRegistry, LevelReduction};
use crate::commit::log_records;
use crate::config::{PolicyKind, SchedulerConfig};
use crate::context::SchedulerContext;
use crate::error::{SchedulerError, SchedulerResult};
use crate::execute::{execute, Outcome};
use crate::operation::Operation;
use crate::policy::{policy_for, LevelStep, SchedulingPolicy};
use crate::request::Request;
use crate::tpg::TaskPrecedenceGraph;
use crate::types::{DependencyType, OpId, OperationState};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use tpg_durability::{DurabilityMode, GroupId, LogRecord, LoggingManager};
use tpg_metrics::{Counter, Metrics, Phase};
use tpg_primitives::{Bid, Partitioner, ThreadId};
use tpg_storage::RecordStore;
use tracing::{debug, trace, warn};

/// Multi-threaded scheduler over one [`TaskPrecedenceGraph`]
///
/// Shared by all workers through an `Arc`. Each worker registers a
/// [`SchedulerContext`], submits its transactions for the batch, then calls
/// [`start_evaluation`](Self::start_evaluation). All workers must call it
/// for every batch, since the phases synchronise on a barrier.
///
/// A returned error is fatal: the other workers are left waiting at the
/// next barrier.
pub struct Scheduler {
    config: SchedulerConfig,
    tpg: TaskPrecedenceGraph,
    store: Arc<dyn RecordStore>,
    logging: Arc<dyn LoggingManager>,
    metrics: Arc<Metrics>,
    policy: Box<dyn SchedulingPolicy>,
    barrier: Barrier,
    level_bound: LevelReduction,
    rollback: LevelReduction,
    failures: FailureRegistry,
    clock: AtomicU64,
}

impl Scheduler {
    /// Create a scheduler over a store
    ///
    /// Every configured table must exist in the store's catalogue.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn RecordStore>,
        logging: Arc<dyn LoggingManager>,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let catalog = store.catalog().clone();
        for table in &config.tables {
            catalog
                .resolve(table)
                .map_err(|_| SchedulerError::UnknownTable(table.clone()))?;
        }
        if logging.mode() != config.durability {
            warn!(
                configured = %config.durability,
                manager = %logging.mode(),
                "Logging manager mode differs from configuration; using the manager's"
            );
        }
        let partitioner = Partitioner::new(config.threads, config.num_items)
            .map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
        let tpg = TaskPrecedenceGraph::new(catalog, partitioner)?;
        debug!(
            threads = config.threads,
            policy = %config.policy,
            durability = %logging.mode(),
            "Scheduler created"
        );
        Ok(Self {
            policy: policy_for(config.policy),
            barrier: Barrier::new(config.threads),
            level_bound: LevelReduction::new(config.threads),
            rollback: LevelReduction::new(config.threads),
            failures: FailureRegistry::new(),
            clock: AtomicU64::new(0),
            metrics: Arc::new(Metrics::new()),
            config,
            tpg,
            store,
            logging,
        })
    }

    /// Share a metrics store with the caller
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The graph
    pub fn graph(&self) -> &TaskPrecedenceGraph {
        &self.tpg
    }

    /// Record store
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Logging manager
    pub fn logging(&self) -> &Arc<dyn LoggingManager> {
        &self.logging
    }

    /// Metrics
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Active policy
    pub fn policy(&self) -> PolicyKind {
        self.policy.kind()
    }

    pub(crate) fn barrier(&self) -> &Barrier {
        &self.barrier
    }

    pub(crate) fn failures(&self) -> &FailureRegistry {
        &self.failures
    }

    pub(crate) fn rollback_reduction(&self) -> &LevelReduction {
        &self.rollback
    }

    // ==== Submission ====

    /// Register a worker's key range and create its context
    pub fn register_context(&self, thread: ThreadId) -> SchedulerResult<SchedulerContext> {
        self.tpg.register_range(thread)?;
        Ok(SchedulerContext::new(thread))
    }

    /// Open a transaction
    pub fn txn_submit_begin(&self, ctx: &mut SchedulerContext) {
        ctx.requests.clear();
    }

    /// Queue one request of the open transaction
    ///
    /// Always `Ok(true)` here; the recovery scheduler answers `false` for
    /// inputs it skips.
    pub fn submit_request(
        &self,
        ctx: &mut SchedulerContext,
        request: Request,
    ) -> SchedulerResult<bool> {
        if !self.tpg.is_registered(ctx.thread()) {
            return Err(SchedulerError::ContextNotRegistered(ctx.thread()));
        }
        request.validate()?;
        ctx.requests.push(request);
        Ok(true)
    }

    /// Close the transaction and build its operations into the graph
    pub fn txn_submit_finished(&self, ctx: &mut SchedulerContext) -> SchedulerResult<()> {
        let requests = std::mem::take(&mut ctx.requests);
        if requests.is_empty() {
            return Ok(());
        }
        let _timer = self.metrics.timer(Phase::Construction);
        let ops = self.tpg.submit_transaction(ctx.thread(), requests)?;
        ctx.submitted += ops.len();
        Ok(())
    }

    // ==== Evaluation ====

    /// Run the batch to completion, commit it as group `marker`, reset
    pub fn start_evaluation(
        &self,
        ctx: &mut SchedulerContext,
        marker: GroupId,
        event_count: usize,
    ) -> SchedulerResult<()> {
        let committed = self.run_batch(ctx, marker, event_count);
        self.reset(ctx)?;
        committed
    }

    /// Execute and commit the batch without resetting
    ///
    /// Split form of [`start_evaluation`](Self::start_evaluation) for
    /// callers that inspect the graph before [`reset`](Self::reset).
    pub fn run_batch(
        &self,
        ctx: &mut SchedulerContext,
        marker: GroupId,
        event_count: usize,
    ) -> SchedulerResult<()> {
        if ctx.in_transaction() {
            return Err(SchedulerError::InvalidRequest(format!(
                "thread {} started evaluation with an open transaction",
                ctx.thread()
            )));
        }
        debug!(
            thread = ctx.thread(),
            marker,
            events = event_count,
            ops = ctx.submitted(),
            "Batch evaluation started"
        );
        self.initialize(ctx)?;
        while !self.finished(ctx) {
            self.explore(ctx)?;
            self.process(ctx)?;
        }
        self.commit(ctx, marker)
    }

    fn initialize(&self, ctx: &mut SchedulerContext) -> SchedulerResult<()> {
        let thread = ctx.thread();
        self.barrier.wait();
        let _timer = self.metrics.timer(Phase::FirstExplore);
        self.tpg.link_temporal(thread);
        self.barrier.wait();
        let buckets = self.tpg.first_time_explore(thread, self.policy.granularity());
        let local_max = buckets.len().saturating_sub(1);
        let max_level = self.level_bound.agree_max(thread, local_max, &self.barrier);
        ctx.load(buckets, max_level);
        trace!(thread, ops = ctx.total(), max_level, "Levels explored");
        Ok(())
    }

    fn finished(&self, ctx: &SchedulerContext) -> bool {
        ctx.current_level > ctx.max_level && ctx.ready.is_empty() && ctx.busy_wait.is_empty()
    }

    /// Pull the next slice of the current level, or end the level
    fn explore(&self, ctx: &mut SchedulerContext) -> SchedulerResult<()> {
        if !ctx.ready.is_empty() {
            return Ok(());
        }
        let _timer = self.metrics.timer(Phase::Explore);
        let level = ctx.current_level;
        let len = ctx.bucket(level).len();
        if ctx.cursor < len {
            let end = (ctx.cursor + self.config.process_batch).min(len);
            ctx.ready
                .extend(ctx.buckets[level][ctx.cursor..end].iter().copied());
            ctx.cursor = end;
            return Ok(());
        }
        match self.policy.explore(self, ctx)? {
            LevelStep::Advance => ctx.current_level += 1,
            LevelStep::Rewind(target) => {
                ctx.current_level = target;
                ctx.ready.clear();
            }
        }
        ctx.cursor = 0;
        Ok(())
    }

    /// Run the ready queue
    ///
    /// Operations already EXECUTED or ABORTED are skipped; ones with
    /// unresolved parents are handed to the policy.
    fn process(&self, ctx: &mut SchedulerContext) -> SchedulerResult<()> {
        let _timer = self.metrics.timer(Phase::Process);
        while let Some(id) = ctx.ready.pop_front() {
            let Some(op) = self.tpg.arena().get(id) else {
                continue;
            };
            if op.state().is_terminal() {
                ctx.scheduled += 1;
                continue;
            }
            if op.pending_total() > 0 {
                self.policy.distribute(ctx, id);
                continue;
            }
            self.run(ctx, &op)?;
        }
        Ok(())
    }

    fn run(&self, ctx: &mut SchedulerContext, op: &Operation) -> SchedulerResult<()> {
        match execute(op, self.store.as_ref())? {
            Outcome::Applied => {
                op.mark_executed(self.clock.fetch_add(1, Ordering::Relaxed));
                self.metrics.incr(Counter::OpsExecuted, 1);
            }
            Outcome::Failed => {
                op.set_failed();
                self.metrics.incr(Counter::OpsFailed, 1);
                trace!(op = %op.id(), bid = %op.bid(), "Guard failed");
                self.policy.handle_failure(self, op);
            }
        }
        ctx.scheduled += 1;
        self.policy.notify(self, op);
        Ok(())
    }

    /// Retry parked operations; with `exhaustive`, until none remain
    pub(crate) fn retry_busy_wait(
        &self,
        ctx: &mut SchedulerContext,
        exhaustive: bool,
    ) -> SchedulerResult<()> {
        loop {
            let mut progressed = false;
            for _ in 0..ctx.busy_wait.len() {
                let Some(id) = ctx.busy_wait.pop_front() else {
                    break;
                };
                let Some(op) = self.tpg.arena().get(id) else {
                    continue;
                };
                if op.state().is_terminal() {
                    ctx.scheduled += 1;
                    progressed = true;
                } else if op.pending_total() > 0 {
                    ctx.busy_wait.push_back(id);
                } else {
                    self.run(ctx, &op)?;
                    progressed = true;
                }
            }
            if !exhaustive || ctx.busy_wait.is_empty() {
                return Ok(());
            }
            if !progressed {
                self.metrics.incr(Counter::BusyWaitRetries, 1);
                std::thread::yield_now();
            }
        }
    }

    /// Resolve the children of a finished operation, once
    ///
    /// Edges into another chain also count down on both chains.
    pub(crate) fn notify_children(&self, op: &Operation) {
        if !op.begin_notify() {
            return;
        }
        let _timer = self.metrics.timer(Phase::Notify);
        let own = self.tpg.chain(op.chain());
        for kind in DependencyType::ALL {
            for child in op.children(kind) {
                let Some(child) = self.tpg.arena().get(child) else {
                    continue;
                };
                child.resolve_parent(kind);
                if kind != DependencyType::Temporal && child.chain() != op.chain() {
                    if let Some(chain) = self.tpg.chain(child.chain()) {
                        chain.resolve_parent_edge();
                    }
                    if let Some(chain) = own {
                        chain.resolve_dependent_edge();
                    }
                }
            }
        }
    }

    pub(crate) fn abort_operation(&self, op: &Operation) {
        if op.mark_aborted() != OperationState::Aborted {
            self.metrics.incr(Counter::OpsAborted, 1);
        }
        self.notify_children(op);
    }

    /// Abort this thread's operations of failed transactions
    ///
    /// Returns the lowest level holding one that had already executed, or
    /// the level after the current one if none had.
    pub(crate) fn mark_failed_transactions(
        &self,
        ctx: &SchedulerContext,
        failed: &BTreeSet<Bid>,
    ) -> SchedulerResult<usize> {
        let mut rollback = ctx.current_level + 1;
        for (level, bucket) in ctx.buckets.iter().enumerate() {
            for id in bucket {
                let Some(op) = self.tpg.arena().get(*id) else {
                    continue;
                };
                if !failed.contains(&op.bid()) {
                    continue;
                }
                match op.mark_aborted() {
                    OperationState::Aborted => continue,
                    OperationState::Executed => {
                        self.store.remove_version(op.key(), op.bid())?;
                        op.revert_success();
                        rollback = rollback.min(level);
                    }
                    OperationState::Blocked | OperationState::Ready => {}
                }
                self.metrics.incr(Counter::OpsAborted, 1);
                self.notify_children(&op);
            }
        }
        Ok(rollback)
    }

    /// Undo every execution at `target` and above
    pub(crate) fn rollback_to(&self, ctx: &mut SchedulerContext, target: usize) -> SchedulerResult<()> {
        for level in target..=ctx.current_level {
            for id in ctx.bucket(level) {
                let Some(op) = self.tpg.arena().get(*id) else {
                    continue;
                };
                if op.state() == OperationState::Executed {
                    self.store.remove_version(op.key(), op.bid())?;
                    op.revert_success();
                    op.set_state(OperationState::Ready);
                }
            }
            ctx.scheduled = ctx.scheduled.saturating_sub(ctx.bucket(level).len());
        }
        if ctx.thread() == 0 {
            self.metrics.incr(Counter::Rollbacks, 1);
        }
        Ok(())
    }

    // ==== Commit and reset ====

    fn commit(&self, ctx: &SchedulerContext, marker: GroupId) -> SchedulerResult<()> {
        let thread = ctx.thread();
        let mode = self.logging.mode();
        if mode.is_enabled() {
            let mut aborted = BTreeSet::new();
            for id in ctx.buckets.iter().flatten() {
                let Some(op) = self.tpg.arena().get(*id) else {
                    continue;
                };
                match op.state() {
                    OperationState::Executed if op.begin_commit() => {
                        for record in log_records(mode, &op, self.tpg.arena(), marker, thread) {
                            self.logging.add_log_record(thread, record);
                        }
                    }
                    OperationState::Aborted if mode == DurabilityMode::Path => {
                        aborted.insert(op.bid());
                    }
                    _ => {}
                }
            }
            for bid in aborted {
                self.logging.add_log_record(thread, LogRecord::Abort { bid });
            }
            if mode == DurabilityMode::Path {
                self.log_placement(thread, marker);
            }
        }
        self.barrier.wait();
        self.logging.commit_group(thread, marker)?;
        trace!(thread, marker, "Group committed");
        Ok(())
    }

    /// Record the weight of every chain this thread owned in the batch
    fn log_placement(&self, thread: ThreadId, marker: GroupId) {
        for id in self.tpg.touched_chains(thread) {
            if let Some(chain) = self.tpg.chain(id) {
                self.logging.add_log_record(
                    thread,
                    LogRecord::Placement {
                        group: marker,
                        key: chain.key(),
                        weight: chain.weight(),
                    },
                );
            }
        }
    }

    /// Fold versions into base values and empty this thread's part of the
    /// graph
    pub fn reset(&self, ctx: &mut SchedulerContext) -> SchedulerResult<()> {
        let thread = ctx.thread();
        self.barrier.wait();
        for id in self.tpg.touched_chains(thread) {
            if let Some(chain) = self.tpg.chain(id) {
                if !chain.is_empty() {
                    self.store.collapse_versions(chain.key())?;
                }
            }
        }
        self.tpg.reset(thread);
        ctx.clear();
        self.barrier.wait();
        Ok(())
    }

    /// Operation by handle, while the batch is live
    pub fn operation(&self, id: OpId) -> Option<Arc<Operation>> {
        self.tpg.arena().get(id)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("threads", &self.config.threads)
            .field("policy", &self.policy.kind())
            .field("durability", &self.logging.mode())
            .finish()
    }
}
