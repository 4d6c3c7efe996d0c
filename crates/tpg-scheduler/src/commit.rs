//! Log records a committed operation contributes

use crate::arena::OperationArena;
use crate::operation::Operation;
use crate::types::{DependencyType, OpId};
use tpg_durability::{DurabilityMode, GroupId, HistoryRecord, LogRecord, OpRef};
use tpg_primitives::ThreadId;

fn op_refs(arena: &OperationArena, ids: impl IntoIterator<Item = OpId>) -> Vec<OpRef> {
    ids.into_iter()
        .filter_map(|id| arena.get(id))
        .map(|op| OpRef::new(op.bid(), op.txn_op_id()))
        .collect()
}

/// Records for one executed operation under `mode`
pub(crate) fn log_records(
    mode: DurabilityMode,
    op: &Operation,
    arena: &OperationArena,
    group: GroupId,
    thread: ThreadId,
) -> Vec<LogRecord> {
    let id = OpRef::new(op.bid(), op.txn_op_id());
    match mode {
        DurabilityMode::None => Vec::new(),
        DurabilityMode::Wal => op
            .written()
            .map(|value| LogRecord::Wal {
                key: op.key(),
                bid: op.bid(),
                value,
            })
            .into_iter()
            .collect(),
        DurabilityMode::Dependency => {
            let in_edges = op_refs(
                arena,
                op.parents(DependencyType::Functional)
                    .into_iter()
                    .chain(op.parents(DependencyType::Temporal)),
            );
            let out_edges = op_refs(
                arena,
                op.children(DependencyType::Functional)
                    .into_iter()
                    .chain(op.children(DependencyType::Temporal)),
            );
            vec![LogRecord::Dependency {
                id,
                in_edges,
                out_edges,
            }]
        }
        DurabilityMode::Lineage => vec![LogRecord::Lineage {
            id,
            pattern: op.pattern().name().to_string(),
            thread,
        }],
        DurabilityMode::Command => vec![LogRecord::Command {
            id,
            key: op.key(),
            pattern: op.pattern().name().to_string(),
        }],
        DurabilityMode::Path => op
            .consumed()
            .into_iter()
            .map(|(source, value)| {
                LogRecord::History(HistoryRecord {
                    group,
                    key: op.key(),
                    source,
                    bid: op.bid(),
                    value,
                })
            })
            .collect(),
    }
}
