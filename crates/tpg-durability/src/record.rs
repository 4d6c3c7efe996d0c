//! Log record family

use crate::history::HistoryRecord;
use crate::GroupId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tpg_primitives::{Bid, RecordKey, ThreadId, TxnOpId, Value};

/// What the scheduler forwards to the logging manager on commit
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// Nothing is logged
    #[default]
    None,
    /// Write-ahead log of resulting values
    Wal,
    /// Values consumed from other keys (history views)
    Path,
    /// Dependency edges of every operation
    Dependency,
    /// Executing thread of every operation
    Lineage,
    /// The command that produced every operation
    Command,
}

impl DurabilityMode {
    /// Check if any record is produced
    pub fn is_enabled(&self) -> bool {
        !matches!(self, DurabilityMode::None)
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            DurabilityMode::None => "none",
            DurabilityMode::Wal => "wal",
            DurabilityMode::Path => "path",
            DurabilityMode::Dependency => "dependency",
            DurabilityMode::Lineage => "lineage",
            DurabilityMode::Command => "command",
        }
    }
}

impl fmt::Display for DurabilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(DurabilityMode::None),
            "wal" => Ok(DurabilityMode::Wal),
            "path" => Ok(DurabilityMode::Path),
            "dependency" => Ok(DurabilityMode::Dependency),
            "lineage" => Ok(DurabilityMode::Lineage),
            "command" => Ok(DurabilityMode::Command),
            other => Err(format!("unknown durability mode: {}", other)),
        }
    }
}

/// Reference to an operation: `bid.txn_op_id`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpRef {
    /// Batch id of the owning transaction
    pub bid: Bid,
    /// Position inside the transaction
    pub txn_op_id: TxnOpId,
}

impl OpRef {
    /// Create a new operation reference
    pub fn new(bid: Bid, txn_op_id: TxnOpId) -> Self {
        Self { bid, txn_op_id }
    }
}

impl fmt::Display for OpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.bid, self.txn_op_id)
    }
}

/// One durable record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogRecord {
    /// Resulting value of a write
    Wal {
        /// Written record
        key: RecordKey,
        /// Writer batch id
        bid: Bid,
        /// Value written
        value: Value,
    },
    /// Dependency edges of an operation
    Dependency {
        /// Operation
        id: OpRef,
        /// Parents (functional and temporal)
        in_edges: Vec<OpRef>,
        /// Children (functional and temporal)
        out_edges: Vec<OpRef>,
    },
    /// Where an operation ran
    Lineage {
        /// Operation
        id: OpRef,
        /// Access pattern name
        pattern: String,
        /// Executing worker
        thread: ThreadId,
    },
    /// The command behind an operation
    Command {
        /// Operation
        id: OpRef,
        /// Destination record
        key: RecordKey,
        /// Access pattern name
        pattern: String,
    },
    /// Value consumed from another key
    History(HistoryRecord),
    /// A transaction that aborted
    Abort {
        /// Aborted batch id
        bid: Bid,
    },
    /// A chain a thread owned in a group, for replay placement
    Placement {
        /// Group the chain was scheduled in
        group: GroupId,
        /// Record of the chain
        key: RecordKey,
        /// Operations plus dependents on other chains
        weight: usize,
    },
}

impl LogRecord {
    /// Batch id the record belongs to, if it describes one transaction
    pub fn bid(&self) -> Option<Bid> {
        match self {
            LogRecord::Wal { bid, .. } => Some(*bid),
            LogRecord::Dependency { id, .. }
            | LogRecord::Lineage { id, .. }
            | LogRecord::Command { id, .. } => Some(id.bid),
            LogRecord::History(h) => Some(h.bid),
            LogRecord::Abort { bid } => Some(*bid),
            LogRecord::Placement { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpg_primitives::{PrimaryKey, TableId};

    #[test]
    fn test_mode_parse() {
        assert_eq!("WAL".parse::<DurabilityMode>().unwrap(), DurabilityMode::Wal);
        assert_eq!("path".parse::<DurabilityMode>().unwrap(), DurabilityMode::Path);
        assert!("zip".parse::<DurabilityMode>().is_err());
        assert!(!DurabilityMode::None.is_enabled());
        assert!(DurabilityMode::Command.is_enabled());
    }

    #[test]
    fn test_op_ref_display() {
        assert_eq!(OpRef::new(Bid(12), 3).to_string(), "12.3");
    }

    #[test]
    fn test_record_json_is_tagged() {
        let record = LogRecord::Wal {
            key: RecordKey::new(TableId(0), PrimaryKey(4)),
            bid: Bid(9),
            value: Value::Long(70),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"wal\""));
        let decoded: LogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.bid(), Some(Bid(9)));
    }
}
