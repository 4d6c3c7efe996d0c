//! Replay of logged batches

use super::graph::{Entry, RecoveryGraph};
use crate::abort::FailureRegistry;
use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::execute::{execute, Outcome};
use crate::request::Request;
use crate::types::{ChainId, OperationState};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use tpg_durability::{GroupId, LoggingManager};
use tpg_metrics::{Counter, Metrics, Phase};
use tpg_primitives::{Partitioner, ThreadId};
use tpg_storage::RecordStore;
use tracing::{debug, trace};

/// Per-thread replay state
#[derive(Debug)]
pub struct RecoveryContext {
    thread: ThreadId,
    requests: Vec<Request>,
    chains: Vec<ChainId>,
    submitted: usize,
    skipped: usize,
}

impl RecoveryContext {
    /// Worker thread index
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Operations submitted since the last reset
    pub fn submitted(&self) -> usize {
        self.submitted
    }

    /// Requests dropped because their transaction aborted in the logged run
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Chains this thread replayed in the latest batch
    pub fn chains(&self) -> &[ChainId] {
        &self.chains
    }
}

/// Chain-at-a-time replay scheduler
///
/// Every worker walks its chains round-robin. An own operation runs once
/// every source chain has passed its shadow; failures abort the whole
/// transaction and the batch is replayed until no new transaction fails.
pub struct RecoveryScheduler {
    config: SchedulerConfig,
    graph: RecoveryGraph,
    store: Arc<dyn RecordStore>,
    logging: Arc<dyn LoggingManager>,
    metrics: Arc<Metrics>,
    barrier: Barrier,
    failures: FailureRegistry,
    clock: AtomicU64,
}

#[derive(Default)]
struct Progress {
    done: bool,
    progressed: bool,
}

impl RecoveryScheduler {
    /// Create a replay scheduler over a store
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn RecordStore>,
        logging: Arc<dyn LoggingManager>,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let partitioner = Partitioner::new(config.threads, config.num_items)
            .map_err(|e| SchedulerError::InvalidConfig(e.to_string()))?;
        let graph = RecoveryGraph::new(store.catalog().clone(), partitioner)?;
        Ok(Self {
            barrier: Barrier::new(config.threads),
            failures: FailureRegistry::new(),
            clock: AtomicU64::new(0),
            metrics: Arc::new(Metrics::new()),
            config,
            graph,
            store,
            logging,
        })
    }

    /// Share a metrics store with the caller
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The graph
    pub fn graph(&self) -> &RecoveryGraph {
        &self.graph
    }

    /// Metrics
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Create a worker's context
    pub fn register_context(&self, thread: ThreadId) -> SchedulerResult<RecoveryContext> {
        if thread >= self.config.threads {
            return Err(SchedulerError::ContextNotRegistered(thread));
        }
        Ok(RecoveryContext {
            thread,
            requests: Vec::new(),
            chains: Vec::new(),
            submitted: 0,
            skipped: 0,
        })
    }

    /// Open a transaction
    pub fn txn_submit_begin(&self, ctx: &mut RecoveryContext) {
        ctx.requests.clear();
    }

    /// Queue one request; `Ok(false)` if its transaction is known to have
    /// aborted and abort push-down is on
    pub fn submit_request(
        &self,
        ctx: &mut RecoveryContext,
        request: Request,
    ) -> SchedulerResult<bool> {
        request.validate()?;
        if self.config.recovery.abort_push_down && self.logging.inspect_abort_view(request.bid) {
            ctx.skipped += 1;
            return Ok(false);
        }
        ctx.requests.push(request);
        Ok(true)
    }

    /// Close the transaction and add its operations to the graph
    pub fn txn_submit_finished(&self, ctx: &mut RecoveryContext) -> SchedulerResult<()> {
        let requests = std::mem::take(&mut ctx.requests);
        if requests.is_empty() {
            return Ok(());
        }
        let ops = self.graph.submit_transaction(ctx.thread, requests)?;
        ctx.submitted += ops.len();
        Ok(())
    }

    /// Replay the batch logged as group `marker`
    pub fn start_evaluation(
        &self,
        ctx: &mut RecoveryContext,
        marker: GroupId,
        event_count: usize,
    ) -> SchedulerResult<()> {
        let thread = ctx.thread;
        debug!(thread, marker, events = event_count, ops = ctx.submitted, "Replay started");
        self.barrier.wait();
        {
            let _timer = self.metrics.timer(Phase::FirstExplore);
            for op in self.graph.arena().shard(thread) {
                self.graph.inspect_dependencies(
                    &op,
                    marker,
                    self.config.recovery.history_view,
                    self.logging.as_ref(),
                )?;
            }
        }
        self.barrier.wait();

        ctx.chains = self.place_chains(thread, marker);
        self.graph.prepare(&ctx.chains);
        self.barrier.wait();

        loop {
            self.replay(ctx)?;
            self.barrier.wait();
            let failed = self.failures.snapshot();
            self.barrier.wait();
            if failed.is_empty() {
                break;
            }
            if thread == 0 {
                self.metrics.incr(Counter::ReplaySecondPass, 1);
                self.failures.clear();
            }
            {
                let _timer = self.metrics.timer(Phase::Abort);
                self.graph.rewind(&ctx.chains, &failed, self.store.as_ref())?;
            }
            trace!(thread, aborted = failed.len(), "Replay rewound");
            self.barrier.wait();
        }
        self.reset(ctx, marker)
    }

    /// Chains this thread replays for group `marker`
    ///
    /// With task placing on and a logged plan for the group, the thread
    /// takes the chains the plan gives it plus any of its own chains the
    /// plan does not cover. Otherwise every thread replays the chains of
    /// its key range.
    fn place_chains(&self, thread: ThreadId, marker: GroupId) -> Vec<ChainId> {
        let own = self.graph.touched_chains(thread);
        if !self.config.recovery.task_placing || !self.logging.can_inspect_task_placing(marker) {
            return own;
        }
        let mut covered = HashSet::new();
        let mut chains = Vec::new();
        for t in 0..self.config.threads {
            for key in self.logging.inspect_task_placing(marker, t) {
                let Ok(id) = self.graph.chain_id(key) else {
                    continue;
                };
                covered.insert(id);
                if t == thread {
                    chains.push(id);
                }
            }
        }
        let uncovered = own.into_iter().filter(|id| !covered.contains(id));
        chains.extend(uncovered);
        trace!(thread, marker, chains = chains.len(), "Chains placed by logged plan");
        chains
    }

    /// Walk this thread's chains until all are exhausted
    fn replay(&self, ctx: &RecoveryContext) -> SchedulerResult<()> {
        let _timer = self.metrics.timer(Phase::Process);
        let mut remaining = ctx.chains.clone();
        while !remaining.is_empty() {
            let mut progressed = false;
            let mut still = Vec::with_capacity(remaining.len());
            for id in remaining {
                let step = self.advance(id)?;
                progressed |= step.progressed;
                if !step.done {
                    still.push(id);
                }
            }
            remaining = still;
            if !progressed && !remaining.is_empty() {
                self.metrics.incr(Counter::BusyWaitRetries, 1);
                std::thread::yield_now();
            }
        }
        Ok(())
    }

    /// Run a chain until it is exhausted or blocked on a source
    fn advance(&self, id: ChainId) -> SchedulerResult<Progress> {
        let Some(chain) = self.graph.chain(id) else {
            return Ok(Progress {
                done: true,
                progressed: false,
            });
        };
        let mut chain = chain.lock();
        let mut progress = Progress::default();
        loop {
            let cursor = chain.cursor;
            match chain.entries.get(cursor) {
                None => {
                    progress.done = true;
                    return Ok(progress);
                }
                Some(Entry::Shadow { consumer, .. }) => {
                    consumer.resolve_pending_dependency();
                }
                Some(Entry::Own(op)) => {
                    if op.state() != OperationState::Aborted {
                        if op.pending_dependencies() > 0 {
                            return Ok(progress);
                        }
                        match execute(op, self.store.as_ref())? {
                            Outcome::Applied => {
                                op.mark_executed(self.clock.fetch_add(1, Ordering::Relaxed));
                                self.metrics.incr(Counter::OpsExecuted, 1);
                            }
                            Outcome::Failed => {
                                op.set_failed();
                                op.set_state(OperationState::Aborted);
                                self.failures.register(op.bid());
                                self.metrics.incr(Counter::OpsFailed, 1);
                            }
                        }
                    }
                }
            }
            chain.cursor += 1;
            progress.progressed = true;
        }
    }

    fn reset(&self, ctx: &mut RecoveryContext, marker: GroupId) -> SchedulerResult<()> {
        self.barrier.wait();
        if ctx.thread == 0 {
            self.logging.release_task_placing(marker);
        }
        for key in self.graph.reset(ctx.thread) {
            self.store.collapse_versions(key)?;
        }
        ctx.requests.clear();
        ctx.submitted = 0;
        ctx.skipped = 0;
        self.barrier.wait();
        Ok(())
    }
}

impl std::fmt::Debug for RecoveryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryScheduler")
            .field("threads", &self.config.threads)
            .field("recovery", &self.config.recovery)
            .finish()
    }
}
