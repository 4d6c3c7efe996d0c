//! Histogram for phase latency tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Bucket upper bounds in microseconds
const BUCKETS: [u64; 10] = [1, 10, 50, 100, 250, 500, 1_000, 5_000, 10_000, u64::MAX];

/// Lock-free latency histogram
#[derive(Debug)]
pub struct Histogram {
    counts: [AtomicU64; BUCKETS.len()],
    sum: AtomicU64,
    count: AtomicU64,
    max: AtomicU64,
}

impl Histogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
            max: AtomicU64::new(0),
        }
    }

    /// Record an observation in microseconds
    pub fn observe(&self, micros: u64) {
        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.max.fetch_max(micros, Ordering::Relaxed);
        let slot = BUCKETS.iter().position(|b| micros <= *b).unwrap_or(BUCKETS.len() - 1);
        self.counts[slot].fetch_add(1, Ordering::Relaxed);
    }

    /// Mean observation
    pub fn mean(&self) -> f64 {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.sum.load(Ordering::Relaxed) as f64 / count as f64
    }

    /// Sum of all observations
    pub fn total(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    /// Largest observation
    pub fn max(&self) -> u64 {
        self.max.load(Ordering::Relaxed)
    }

    /// Number of observations
    pub fn total_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Upper bound of the bucket holding quantile `q` (0.0 ..= 1.0)
    pub fn quantile(&self, q: f64) -> u64 {
        let count = self.total_count();
        if count == 0 {
            return 0;
        }
        let target = ((count as f64) * q.clamp(0.0, 1.0)).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (bound, c) in BUCKETS.iter().zip(self.counts.iter()) {
            seen += c.load(Ordering::Relaxed);
            if seen >= target {
                return (*bound).min(self.max());
            }
        }
        self.max()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_max() {
        let h = Histogram::new();
        h.observe(100);
        h.observe(300);
        assert_eq!(h.mean(), 200.0);
        assert_eq!(h.max(), 300);
        assert_eq!(h.total_count(), 2);
        assert_eq!(h.total(), 400);
    }

    #[test]
    fn test_quantile_bucket_bound() {
        let h = Histogram::new();
        for _ in 0..9 {
            h.observe(5);
        }
        h.observe(7_000);
        assert_eq!(h.quantile(0.5), 10);
        assert_eq!(h.quantile(1.0), 7_000);
    }

    #[test]
    fn test_empty() {
        let h = Histogram::new();
        assert_eq!(h.mean(), 0.0);
        assert_eq!(h.quantile(0.99), 0);
    }
}
