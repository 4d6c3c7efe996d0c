//! # tpg-metrics
//!
//! Scheduler observability for the TPG transaction engine.
//!
//! Features:
//! - Per-phase latency histograms (explore, process, notify, abort, ...)
//! - Event counters (executed, aborted, rollbacks, ...)
//! - JSON export

#![warn(missing_docs)]
#![warn(clippy::all)]

mod collector;
mod export;
mod histogram;
mod phase;

pub use collector::{Metrics, PhaseTimer};
pub use export::{MetricsSnapshot, PhaseSummary};
pub use histogram::Histogram;
pub use phase::{Counter, Phase};

/// Macro for timing a block of code against a scheduler phase
#[macro_export]
macro_rules! timed {
    ($metrics:expr, $phase:expr, $block:block) => {{
        let start = std::time::Instant::now();
        let result = $block;
        $metrics.observe($phase, start.elapsed());
        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_macro_records_phase() {
        let metrics = Metrics::new();
        let value = timed!(metrics, Phase::Process, { 1 + 1 });
        assert_eq!(value, 2);
        assert_eq!(metrics.phase_count(Phase::Process), 1);
    }
}
