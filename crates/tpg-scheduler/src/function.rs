//! Per-operation functions, guards and result slots

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tpg_primitives::Value;

/// Pure function an operation applies to its record
///
/// `current` is the record's value before this operation's bid, `sources`
/// the values of the operation's source records at the same point. `None`
/// vetoes the write.
pub trait Function: Send + Sync + fmt::Debug {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Compute the new value
    fn apply(&self, current: &Value, sources: &[Value]) -> Option<Value>;
}

/// Add a delta
#[derive(Clone, Copy, Debug)]
pub struct Inc(pub Value);

impl Function for Inc {
    fn name(&self) -> &'static str {
        "inc"
    }

    fn apply(&self, current: &Value, _sources: &[Value]) -> Option<Value> {
        Some(current.add(&self.0))
    }
}

/// Subtract a delta
#[derive(Clone, Copy, Debug)]
pub struct Dec(pub Value);

impl Function for Dec {
    fn name(&self) -> &'static str {
        "dec"
    }

    fn apply(&self, current: &Value, _sources: &[Value]) -> Option<Value> {
        Some(current.sub(&self.0))
    }
}

/// Sum of the source values
#[derive(Clone, Copy, Debug, Default)]
pub struct Sum;

impl Function for Sum {
    fn name(&self) -> &'static str {
        "sum"
    }

    fn apply(&self, _current: &Value, sources: &[Value]) -> Option<Value> {
        let (first, rest) = sources.split_first()?;
        Some(rest.iter().fold(*first, |acc, v| acc.add(v)))
    }
}

/// Mean of the source values
///
/// Integer sources give an integer (truncating) mean.
#[derive(Clone, Copy, Debug, Default)]
pub struct Avg;

impl Function for Avg {
    fn name(&self) -> &'static str {
        "avg"
    }

    fn apply(&self, current: &Value, sources: &[Value]) -> Option<Value> {
        let total = Sum.apply(current, sources)?;
        let n = sources.len() as i64;
        Some(match total {
            Value::Long(sum) => Value::Long(sum / n),
            Value::Double(sum) => Value::Double(sum / n as f64),
        })
    }
}

/// Smoothed average of incoming samples
///
/// Vetoes samples at or above `limit`.
#[derive(Clone, Copy, Debug)]
pub struct RunningAvg {
    /// Incoming sample
    pub sample: f64,
    /// Exclusive upper bound on accepted samples
    pub limit: f64,
}

impl Function for RunningAvg {
    fn name(&self) -> &'static str {
        "running_avg"
    }

    fn apply(&self, current: &Value, _sources: &[Value]) -> Option<Value> {
        if self.sample >= self.limit {
            return None;
        }
        let current = current.as_double();
        if current == 0.0 {
            Some(Value::Double(self.sample))
        } else {
            Some(Value::Double((current + self.sample) / 2.0))
        }
    }
}

/// Guard on a source value: holds when the value exceeds both arguments
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Condition {
    /// First threshold
    pub arg1: Value,
    /// Second threshold
    pub arg2: Value,
}

impl Condition {
    /// Create a guard
    pub fn new(arg1: impl Into<Value>, arg2: impl Into<Value>) -> Self {
        Self {
            arg1: arg1.into(),
            arg2: arg2.into(),
        }
    }

    /// Guard that holds when `value > threshold`
    pub fn greater_than(threshold: impl Into<Value>) -> Self {
        let threshold = threshold.into();
        Self::new(threshold, threshold)
    }

    /// Evaluate against a source value
    pub fn holds(&self, value: &Value) -> bool {
        value.greater_than(&self.arg1) && value.greater_than(&self.arg2)
    }
}

/// Count of guarded writes that went through, shared by a transaction's
/// operations
#[derive(Clone, Debug, Default)]
pub struct SuccessCounter(Arc<Mutex<u32>>);

impl SuccessCounter {
    /// Create a zeroed counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Current count
    pub fn get(&self) -> u32 {
        *self.0.lock()
    }

    pub(crate) fn increment(&self) {
        *self.0.lock() += 1;
    }

    pub(crate) fn decrement(&self) {
        let mut count = self.0.lock();
        *count = count.saturating_sub(1);
    }
}

/// Slot receiving the value a read pattern produced
#[derive(Clone, Debug, Default)]
pub struct OutputSlot(Arc<Mutex<Option<Value>>>);

impl OutputSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Value written so far
    pub fn get(&self) -> Option<Value> {
        *self.0.lock()
    }

    pub(crate) fn set(&self, value: Value) {
        *self.0.lock() = Some(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inc_dec() {
        assert_eq!(Inc(Value::Long(5)).apply(&Value::Long(10), &[]), Some(Value::Long(15)));
        assert_eq!(Dec(Value::Long(5)).apply(&Value::Long(10), &[]), Some(Value::Long(5)));
    }

    #[test]
    fn test_sum_and_avg() {
        let sources = [Value::Long(2), Value::Long(4), Value::Long(9)];
        assert_eq!(Sum.apply(&Value::Long(0), &sources), Some(Value::Long(15)));
        assert_eq!(Avg.apply(&Value::Long(0), &sources), Some(Value::Long(5)));
        assert_eq!(Avg.apply(&Value::Long(0), &[]), None);
    }

    #[test]
    fn test_running_avg() {
        let f = RunningAvg {
            sample: 40.0,
            limit: 100.0,
        };
        assert_eq!(f.apply(&Value::Double(0.0), &[]), Some(Value::Double(40.0)));
        assert_eq!(f.apply(&Value::Double(60.0), &[]), Some(Value::Double(50.0)));

        let hot = RunningAvg {
            sample: 120.0,
            limit: 100.0,
        };
        assert_eq!(hot.apply(&Value::Double(60.0), &[]), None);
    }

    #[test]
    fn test_condition() {
        let guard = Condition::greater_than(30);
        assert!(guard.holds(&Value::Long(31)));
        assert!(!guard.holds(&Value::Long(30)));

        let guard = Condition::new(10, 50);
        assert!(!guard.holds(&Value::Long(40)));
    }

    #[test]
    fn test_success_counter_shared() {
        let counter = SuccessCounter::new();
        let clone = counter.clone();
        clone.increment();
        clone.increment();
        counter.decrement();
        assert_eq!(counter.get(), 1);
        counter.decrement();
        counter.decrement();
        assert_eq!(counter.get(), 0);
    }
}
