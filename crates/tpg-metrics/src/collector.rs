//! Scheduler metrics store

use crate::histogram::Histogram;
use crate::phase::{Counter, Phase};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Thread-safe scheduler metrics
///
/// Shared by every worker through an `Arc`. Counters sit on their own cache
/// lines since all workers bump them on the hot path.
#[derive(Debug)]
pub struct Metrics {
    phases: [Histogram; Phase::COUNT],
    counters: [CachePadded<AtomicU64>; Counter::COUNT],
}

impl Metrics {
    /// Create an empty metrics store
    pub fn new() -> Self {
        Self {
            phases: std::array::from_fn(|_| Histogram::new()),
            counters: std::array::from_fn(|_| CachePadded::new(AtomicU64::new(0))),
        }
    }

    /// Record time spent in a phase
    pub fn observe(&self, phase: Phase, elapsed: Duration) {
        self.phases[phase.index()].observe(elapsed.as_micros() as u64);
    }

    /// Start timing a phase; recorded when the guard drops
    pub fn timer(&self, phase: Phase) -> PhaseTimer<'_> {
        PhaseTimer {
            metrics: self,
            phase,
            start: Instant::now(),
        }
    }

    /// Increment a counter
    pub fn incr(&self, counter: Counter, delta: u64) {
        self.counters[counter.index()].fetch_add(delta, Ordering::Relaxed);
    }

    /// Counter value
    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    /// Histogram of a phase
    pub fn phase(&self, phase: Phase) -> &Histogram {
        &self.phases[phase.index()]
    }

    /// Observations recorded for a phase
    pub fn phase_count(&self, phase: Phase) -> u64 {
        self.phases[phase.index()].total_count()
    }

    /// Log every counter and phase total at info level
    pub fn log_summary(&self) {
        for counter in Counter::ALL {
            info!(counter = counter.name(), value = self.get(counter), "Scheduler counter");
        }
        for phase in Phase::ALL {
            let h = self.phase(phase);
            info!(
                phase = phase.name(),
                count = h.total_count(),
                total_us = h.total(),
                mean_us = h.mean(),
                "Scheduler phase"
            );
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop guard timing one phase
#[must_use = "the phase is recorded when the timer drops"]
pub struct PhaseTimer<'a> {
    metrics: &'a Metrics,
    phase: Phase,
    start: Instant,
}

impl Drop for PhaseTimer<'_> {
    fn drop(&mut self) {
        self.metrics.observe(self.phase, self.start.elapsed());
    }
}
