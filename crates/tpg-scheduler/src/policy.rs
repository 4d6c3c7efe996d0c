//! Scheduling policies
//!
//! The engine drives EXPLORE and PROCESS; a policy decides what happens
//! at the points where the variants differ.

use crate::config::PolicyKind;
use crate::context::SchedulerContext;
use crate::error::SchedulerResult;
use crate::operation::Operation;
use crate::scheduler::Scheduler;
use crate::types::{Granularity, OpId};
use std::fmt;
use tpg_metrics::Phase;
use tracing::debug;

/// What the engine does once a level's bucket is exhausted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelStep {
    /// Move to the next level
    Advance,
    /// Restart from an earlier level after a rollback
    Rewind(usize),
}

/// Policy hooks called by the [`Scheduler`]
pub trait SchedulingPolicy: Send + Sync + fmt::Debug {
    /// Which policy this is
    fn kind(&self) -> PolicyKind;

    /// What the levels of [`first_time_explore`](crate::TaskPrecedenceGraph::first_time_explore) group
    fn granularity(&self) -> Granularity {
        Granularity::Operation
    }

    /// Finish the current level
    fn explore(&self, scheduler: &Scheduler, ctx: &mut SchedulerContext)
        -> SchedulerResult<LevelStep>;

    /// Park an operation whose parents have not all resolved
    fn distribute(&self, ctx: &mut SchedulerContext, op: OpId) {
        ctx.busy_wait.push_back(op);
    }

    /// Resolve the children of a finished operation
    fn notify(&self, scheduler: &Scheduler, op: &Operation) {
        scheduler.notify_children(op);
    }

    /// React to a vetoed write
    fn handle_failure(&self, scheduler: &Scheduler, op: &Operation) {
        scheduler.abort_operation(op);
    }
}

pub(crate) fn policy_for(kind: PolicyKind) -> Box<dyn SchedulingPolicy> {
    match kind {
        PolicyKind::Layered => Box::new(Layered),
        PolicyKind::LayeredAbort => Box::new(LayeredAbort),
        PolicyKind::Eager => Box::new(Eager),
        PolicyKind::ChainLayered => Box::new(ChainLayered),
    }
}

/// Barrier after every level
#[derive(Debug)]
struct Layered;

impl SchedulingPolicy for Layered {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Layered
    }

    fn explore(
        &self,
        scheduler: &Scheduler,
        ctx: &mut SchedulerContext,
    ) -> SchedulerResult<LevelStep> {
        scheduler.retry_busy_wait(ctx, true)?;
        scheduler.barrier().wait();
        Ok(LevelStep::Advance)
    }
}

/// Layered, plus whole-transaction abort with rollback at level ends
#[derive(Debug)]
struct LayeredAbort;

impl SchedulingPolicy for LayeredAbort {
    fn kind(&self) -> PolicyKind {
        PolicyKind::LayeredAbort
    }

    fn explore(
        &self,
        scheduler: &Scheduler,
        ctx: &mut SchedulerContext,
    ) -> SchedulerResult<LevelStep> {
        scheduler.retry_busy_wait(ctx, true)?;
        let barrier = scheduler.barrier();
        barrier.wait();

        let failed = scheduler.failures().snapshot();
        if failed.is_empty() {
            barrier.wait();
            return Ok(LevelStep::Advance);
        }

        let local = {
            let _timer = scheduler.metrics().timer(Phase::Abort);
            scheduler.mark_failed_transactions(ctx, &failed)?
        };
        let target = scheduler.rollback_reduction().agree_min(
            ctx.thread(),
            local,
            barrier,
            || scheduler.failures().clear(),
        );
        if target > ctx.current_level() {
            return Ok(LevelStep::Advance);
        }

        {
            let _timer = scheduler.metrics().timer(Phase::Abort);
            scheduler.rollback_to(ctx, target)?;
        }
        barrier.wait();
        debug!(
            thread = ctx.thread(),
            from = ctx.current_level(),
            to = target,
            aborted = failed.len(),
            "Rolled back"
        );
        Ok(LevelStep::Rewind(target))
    }

    fn handle_failure(&self, scheduler: &Scheduler, op: &Operation) {
        scheduler.failures().register(op.bid());
        scheduler.abort_operation(op);
    }
}

/// No level barriers; parked operations are retried after every level
#[derive(Debug)]
struct Eager;

impl SchedulingPolicy for Eager {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Eager
    }

    fn explore(
        &self,
        scheduler: &Scheduler,
        ctx: &mut SchedulerContext,
    ) -> SchedulerResult<LevelStep> {
        let last = ctx.current_level() >= ctx.max_level();
        scheduler.retry_busy_wait(ctx, last)?;
        Ok(LevelStep::Advance)
    }
}

/// Chain-at-a-time levels
///
/// Operations whose parents live in a chain of the same or a later level
/// are parked and retried before each barrier; the last level drains them.
#[derive(Debug)]
struct ChainLayered;

impl SchedulingPolicy for ChainLayered {
    fn kind(&self) -> PolicyKind {
        PolicyKind::ChainLayered
    }

    fn granularity(&self) -> Granularity {
        Granularity::Chain
    }

    fn explore(
        &self,
        scheduler: &Scheduler,
        ctx: &mut SchedulerContext,
    ) -> SchedulerResult<LevelStep> {
        let last = ctx.current_level() >= ctx.max_level();
        scheduler.retry_busy_wait(ctx, last)?;
        scheduler.barrier().wait();
        Ok(LevelStep::Advance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_for_every_kind() {
        for kind in PolicyKind::ALL {
            assert_eq!(policy_for(kind).kind(), kind);
        }
    }

    #[test]
    fn test_only_chain_layered_schedules_chains() {
        for kind in PolicyKind::ALL {
            let expected = if kind == PolicyKind::ChainLayered {
                Granularity::Chain
            } else {
                Granularity::Operation
            };
            assert_eq!(policy_for(kind).granularity(), expected);
        }
    }
}
