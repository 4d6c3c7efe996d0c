//! Identifiers for batches and records

use std::fmt;

/// Batch id: the logical timestamp of an input event
///
/// Batch ids increase monotonically per source and order every operation
/// touching the same record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bid(pub u64);

impl Bid {
    /// Create a new batch id
    pub fn new(bid: u64) -> Self {
        Self(bid)
    }

    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Bid {
    fn from(bid: u64) -> Self {
        Self(bid)
    }
}

impl fmt::Display for Bid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index of a table in the catalogue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TableId(pub u16);

impl TableId {
    /// Position in the catalogue
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl From<usize> for TableId {
    fn from(idx: usize) -> Self {
        Self(idx as u16)
    }
}

/// Primary key of a record inside its table
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PrimaryKey(pub u64);

impl PrimaryKey {
    /// Get the raw value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for PrimaryKey {
    fn from(key: u64) -> Self {
        Self(key)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A (table, primary key) pair identifying one record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecordKey {
    /// Owning table
    pub table: TableId,
    /// Key inside the table
    pub key: PrimaryKey,
}

impl RecordKey {
    /// Create a new record key
    pub fn new(table: TableId, key: PrimaryKey) -> Self {
        Self { table, key }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table.0, self.key.0)
    }
}
