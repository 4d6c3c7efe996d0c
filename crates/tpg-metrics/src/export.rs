//! Metrics snapshot and JSON export

use crate::collector::Metrics;
use crate::phase::{Counter, Phase};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of all metrics at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Counter values
    pub counters: BTreeMap<String, u64>,
    /// Phase summaries
    pub phases: BTreeMap<String, PhaseSummary>,
}

/// Summary of one phase histogram
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSummary {
    /// Observations
    pub count: u64,
    /// Total time (microseconds)
    pub total_us: u64,
    /// Mean time (microseconds)
    pub mean_us: f64,
    /// 99th percentile bucket bound (microseconds)
    pub p99_us: u64,
    /// Largest observation (microseconds)
    pub max_us: u64,
}

impl MetricsSnapshot {
    /// Create a snapshot from a Metrics instance
    pub fn from_metrics(metrics: &Metrics) -> Self {
        let counters = Counter::ALL
            .iter()
            .map(|c| (c.name().to_string(), metrics.get(*c)))
            .collect();
        let phases = Phase::ALL
            .iter()
            .map(|p| {
                let h = metrics.phase(*p);
                (
                    p.name().to_string(),
                    PhaseSummary {
                        count: h.total_count(),
                        total_us: h.total(),
                        mean_us: h.mean(),
                        p99_us: h.quantile(0.99),
                        max_us: h.max(),
                    },
                )
            })
            .collect();
        Self { counters, phases }
    }

    /// Export snapshot as JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export snapshot as compact JSON string
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
