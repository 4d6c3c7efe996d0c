//! Handles and enums shared across the graph

use std::fmt;

/// Handle of an operation in the [`OperationArena`](crate::OperationArena)
///
/// The high bits name the arena shard (the submitting thread), the low
/// bits the position inside the shard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(pub u32);

impl OpId {
    const SHARD_BITS: u32 = 8;
    const INDEX_BITS: u32 = 32 - Self::SHARD_BITS;
    const INDEX_MASK: u32 = (1 << Self::INDEX_BITS) - 1;

    /// Maximum number of arena shards
    pub const MAX_SHARDS: usize = 1 << Self::SHARD_BITS;

    /// Maximum operations per shard per batch
    pub const MAX_INDEX: usize = 1 << Self::INDEX_BITS;

    /// Pack a shard and index
    pub fn new(shard: usize, index: usize) -> Self {
        Self(((shard as u32) << Self::INDEX_BITS) | (index as u32 & Self::INDEX_MASK))
    }

    /// Arena shard
    pub fn shard(&self) -> usize {
        (self.0 >> Self::INDEX_BITS) as usize
    }

    /// Position inside the shard
    pub fn index(&self) -> usize {
        (self.0 & Self::INDEX_MASK) as usize
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}/{}", self.shard(), self.index())
    }
}

/// Handle of an operation chain: `table_index * num_items + key`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(pub u32);

impl ChainId {
    /// Position in the chain vector
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Operation state
///
/// ```text
/// Blocked ──(all countdowns 0)──▶ Ready ──(function ran)──▶ Executed
///    │                              │                          │
///    └────────────(abort)───────────┴──────▶ Aborted ◀─(abort)─┘
/// ```
///
/// A rollback moves `Executed` back to `Ready`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OperationState {
    /// Waiting on at least one parent
    Blocked = 0,
    /// Every parent resolved
    Ready = 1,
    /// Function applied
    Executed = 2,
    /// Vetoed; never executes again this batch
    Aborted = 3,
}

impl OperationState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => OperationState::Blocked,
            1 => OperationState::Ready,
            2 => OperationState::Executed,
            _ => OperationState::Aborted,
        }
    }

    /// Check if the operation will not run again
    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationState::Executed | OperationState::Aborted)
    }
}

/// Unit a policy levels and schedules
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Granularity {
    /// Each operation at its own dependency level
    #[default]
    Operation,
    /// Every operation of a chain at the chain's level, chain by chain
    Chain,
}

/// Kind of dependency edge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DependencyType {
    /// Same key, strict arrival order
    Temporal,
    /// Reads the value another key's operation wrote
    Functional,
    /// Same transaction, declared order
    Logical,
}

impl DependencyType {
    /// Every kind in index order
    pub const ALL: [DependencyType; 3] = [
        DependencyType::Temporal,
        DependencyType::Functional,
        DependencyType::Logical,
    ];

    /// Dense index
    pub fn index(self) -> usize {
        self as usize
    }
}

/// How an operation accesses its records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessPattern {
    /// Overwrite with a static value
    WriteOnly,
    /// Apply a function to the current value
    ReadWrite,
    /// Read-modify-write gated by a guard on a source value
    ReadWriteCond,
    /// Guarded read-modify-write that returns the resulting value
    ReadWriteCondRead,
    /// Read-modify-write that returns the resulting value
    ReadWriteRead,
    /// Aggregate over several sources, returning the result
    ReadWriteCondReadN,
}

impl AccessPattern {
    /// Stable name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            AccessPattern::WriteOnly => "write_only",
            AccessPattern::ReadWrite => "read_write",
            AccessPattern::ReadWriteCond => "read_write_cond",
            AccessPattern::ReadWriteCondRead => "read_write_cond_read",
            AccessPattern::ReadWriteRead => "read_write_read",
            AccessPattern::ReadWriteCondReadN => "read_write_cond_read_n",
        }
    }

    /// Check if the pattern evaluates a guard
    pub fn is_guarded(&self) -> bool {
        matches!(
            self,
            AccessPattern::ReadWriteCond | AccessPattern::ReadWriteCondRead
        )
    }
}
