//! Task placement for recovery replay
//!
//! During a logged run every thread reports the operation chains it owned
//! in a group together with their weight. At replay time a deterministic
//! plan hands the heaviest chains out first, each to the currently least
//! loaded thread.

use crate::GroupId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tpg_primitives::{RecordKey, ThreadId};

/// Collected chain weights and computed plans, per group
#[derive(Debug, Default)]
pub struct TaskPlacing {
    nodes: Mutex<HashMap<GroupId, Vec<(RecordKey, usize)>>>,
    plans: Mutex<HashMap<GroupId, Arc<Vec<Vec<RecordKey>>>>>,
}

impl TaskPlacing {
    /// Create an empty placement registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a chain of `weight` operations
    pub fn add_node(&self, group: GroupId, key: RecordKey, weight: usize) {
        self.nodes.lock().entry(group).or_default().push((key, weight));
    }

    /// Check if any chain was reported for `group`
    pub fn contains(&self, group: GroupId) -> bool {
        self.plans.lock().contains_key(&group) || self.nodes.lock().contains_key(&group)
    }

    /// Chains assigned to `thread` for `group`
    ///
    /// Must only be called after every chain of the group was reported.
    /// Empty for a group nothing was reported for.
    pub fn assignment(&self, group: GroupId, thread: ThreadId, threads: usize) -> Vec<RecordKey> {
        let plan = {
            let mut plans = self.plans.lock();
            match plans.get(&group) {
                Some(plan) => Arc::clone(plan),
                None => {
                    let Some(nodes) = self.nodes.lock().remove(&group) else {
                        return Vec::new();
                    };
                    let plan = Arc::new(Self::plan(nodes, threads));
                    plans.insert(group, Arc::clone(&plan));
                    plan
                }
            }
        };
        plan.get(thread).cloned().unwrap_or_default()
    }

    /// Drop the reports and plan of a group that finished replaying
    pub fn forget(&self, group: GroupId) {
        self.plans.lock().remove(&group);
        self.nodes.lock().remove(&group);
    }

    /// Drop every group up to and including `group`
    pub fn forget_through(&self, group: GroupId) {
        self.plans.lock().retain(|g, _| *g > group);
        self.nodes.lock().retain(|g, _| *g > group);
    }

    /// Groups with reports or a plan
    pub fn len(&self) -> usize {
        let plans = self.plans.lock();
        let nodes = self.nodes.lock();
        plans.len() + nodes.keys().filter(|g| !plans.contains_key(g)).count()
    }

    /// Check if nothing is held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn plan(mut nodes: Vec<(RecordKey, usize)>, threads: usize) -> Vec<Vec<RecordKey>> {
        let threads = threads.max(1);
        nodes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut loads = vec![0usize; threads];
        let mut plan = vec![Vec::new(); threads];
        for (key, weight) in nodes {
            let target = loads
                .iter()
                .enumerate()
                .min_by_key(|(i, load)| (**load, *i))
                .map(|(i, _)| i)
                .unwrap_or(0);
            loads[target] += weight;
            plan[target].push(key);
        }
        plan
    }
}
