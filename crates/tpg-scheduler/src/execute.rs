//! Running one operation against the record store

use crate::error::{SchedulerError, SchedulerResult};
use crate::function::Function;
use crate::operation::Operation;
use crate::types::AccessPattern;
use std::sync::Arc;
use tpg_primitives::{RecordKey, Value};
use tpg_storage::RecordStore;

/// Result of running an operation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The write went through
    Applied,
    /// The guard or function vetoed the write
    Failed,
}

fn function(op: &Operation) -> SchedulerResult<&Arc<dyn Function>> {
    op.function().ok_or_else(|| {
        SchedulerError::InvalidRequest(format!("{} has no function", op.id()))
    })
}

/// Value of a source record as this operation sees it
///
/// A recorded history value wins over the store.
fn read_source(op: &Operation, store: &dyn RecordStore, source: RecordKey) -> SchedulerResult<Value> {
    let value = match op.preset_value(source) {
        Some(value) => value,
        None => store.read_value_at(source, op.bid())?,
    };
    if source != op.key() {
        op.record_consumed(source, value);
    }
    Ok(value)
}

/// Apply an operation's pattern
///
/// Reads see the latest version older than the operation's bid; a write
/// lands as the version at that bid.
pub(crate) fn execute(op: &Operation, store: &dyn RecordStore) -> SchedulerResult<Outcome> {
    let key = op.key();
    let bid = op.bid();
    let outcome = match op.pattern() {
        AccessPattern::WriteOnly => {
            let value = op.static_value().ok_or_else(|| {
                SchedulerError::InvalidRequest(format!("{} has no value", op.id()))
            })?;
            store.write_value_at(key, bid, value)?;
            op.set_written(Some(value));
            Outcome::Applied
        }
        AccessPattern::ReadWrite | AccessPattern::ReadWriteRead => {
            let current = store.read_value_at(key, bid)?;
            match function(op)?.apply(&current, &[]) {
                Some(next) => {
                    store.write_value_at(key, bid, next)?;
                    op.set_written(Some(next));
                    if let Some(output) = op.output() {
                        output.set(next);
                    }
                    Outcome::Applied
                }
                None => {
                    op.set_written(None);
                    if let Some(output) = op.output() {
                        output.set(current);
                    }
                    Outcome::Failed
                }
            }
        }
        AccessPattern::ReadWriteCond | AccessPattern::ReadWriteCondRead => {
            let source = op.sources().first().copied().ok_or_else(|| {
                SchedulerError::InvalidRequest(format!("{} has no source", op.id()))
            })?;
            let guard_value = read_source(op, store, source)?;
            let current = store.read_value_at(key, bid)?;
            let passes = op.condition().map_or(false, |c| c.holds(&guard_value));
            let next = if passes {
                function(op)?.apply(&current, &[guard_value])
            } else {
                None
            };
            let result = guarded_write(op, store, next)?;
            if op.pattern() == AccessPattern::ReadWriteCondRead {
                if let Some(output) = op.output() {
                    output.set(next.unwrap_or(current));
                }
            }
            result
        }
        AccessPattern::ReadWriteCondReadN => {
            let mut values = Vec::with_capacity(op.sources().len());
            for source in op.sources() {
                values.push(read_source(op, store, *source)?);
            }
            let current = store.read_value_at(key, bid)?;
            let next = function(op)?
                .apply(&current, &values)
                .filter(|aggregate| op.condition().map_or(true, |c| c.holds(aggregate)));
            let result = guarded_write(op, store, next)?;
            if let Some(output) = op.output() {
                output.set(next.unwrap_or(current));
            }
            result
        }
    };
    Ok(outcome)
}

fn guarded_write(
    op: &Operation,
    store: &dyn RecordStore,
    next: Option<Value>,
) -> SchedulerResult<Outcome> {
    op.set_written(next);
    let Some(next) = next else {
        return Ok(Outcome::Failed);
    };
    store.write_value_at(op.key(), op.bid(), next)?;
    if let Some(success) = op.success() {
        success.increment();
        op.set_succeeded();
    }
    Ok(Outcome::Applied)
}
