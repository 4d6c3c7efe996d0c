//! History views: values an operation consumed from other keys, and the
//! transactions that aborted
//!
//! During recovery a consumer whose source value was recorded does not
//! need to wait for the source key to be replayed, and an input whose
//! transaction is known to have aborted need not be replayed at all.

use crate::GroupId;
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use tpg_primitives::{Bid, RecordKey, Value};

/// A consumed source value
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Group (batch marker) the consumer committed in
    pub group: GroupId,
    /// Consumer's destination record
    pub key: RecordKey,
    /// Source record read
    pub source: RecordKey,
    /// Consumer batch id
    pub bid: Bid,
    /// Value observed
    pub value: Value,
}

type ViewKey = (GroupId, RecordKey, RecordKey, Bid);

/// Index over committed history records
#[derive(Debug, Default)]
pub struct HistoryViews {
    views: DashMap<ViewKey, Value>,
    groups: DashSet<GroupId>,
    aborts: DashSet<Bid>,
}

impl HistoryViews {
    /// Create empty views
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a committed record
    pub fn add(&self, record: &HistoryRecord) {
        self.groups.insert(record.group);
        self.views.insert(
            (record.group, record.key, record.source, record.bid),
            record.value,
        );
    }

    /// Record an aborted transaction
    pub fn add_abort(&self, bid: Bid) {
        self.aborts.insert(bid);
    }

    /// Check if the transaction at `bid` aborted in the logged run
    pub fn inspect_abort_view(&self, bid: Bid) -> bool {
        self.aborts.contains(&bid)
    }

    /// Check if any history was recorded for a group
    pub fn check_group_id(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }

    /// Value `key`'s operation at `bid` consumed from `source`, if recorded
    pub fn inspect_dependency_view(
        &self,
        group: GroupId,
        key: RecordKey,
        source: RecordKey,
        bid: Bid,
    ) -> Option<Value> {
        self.views.get(&(group, key, source, bid)).map(|v| *v)
    }

    /// Number of recorded views
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Check if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpg_primitives::{PrimaryKey, TableId};

    fn key(k: u64) -> RecordKey {
        RecordKey::new(TableId(0), PrimaryKey(k))
    }

    #[test]
    fn test_inspect() {
        let views = HistoryViews::new();
        views.add(&HistoryRecord {
            group: 2,
            key: key(1),
            source: key(0),
            bid: Bid(40),
            value: Value::Long(100),
        });

        assert!(views.check_group_id(2));
        assert!(!views.check_group_id(3));
        assert_eq!(
            views.inspect_dependency_view(2, key(1), key(0), Bid(40)),
            Some(Value::Long(100))
        );
        assert_eq!(views.inspect_dependency_view(2, key(1), key(0), Bid(41)), None);
        assert_eq!(views.len(), 1);
    }

    #[test]
    fn test_abort_view() {
        let views = HistoryViews::new();
        views.add_abort(Bid(12));
        assert!(views.inspect_abort_view(Bid(12)));
        assert!(!views.inspect_abort_view(Bid(13)));
        assert!(views.is_empty());
    }
}
