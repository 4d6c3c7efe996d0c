//! Record values

use crate::error::{PrimitiveError, PrimitiveResult};
use std::fmt;

/// Numeric value stored in a record
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Value {
    /// Integer value (balances, counters)
    Long(i64),
    /// Floating point value (averages)
    Double(f64),
}

impl Value {
    /// Kind name used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Long(_) => "long",
            Value::Double(_) => "double",
        }
    }

    /// Get as integer
    pub fn as_long(&self) -> PrimitiveResult<i64> {
        match self {
            Value::Long(v) => Ok(*v),
            other => Err(PrimitiveError::TypeMismatch {
                expected: "long",
                found: other.kind(),
            }),
        }
    }

    /// Get as float, widening integers
    pub fn as_double(&self) -> f64 {
        match self {
            Value::Long(v) => *v as f64,
            Value::Double(v) => *v,
        }
    }

    /// Add two values, staying integral when both sides are
    pub fn add(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => Value::Long(a.wrapping_add(*b)),
            _ => Value::Double(self.as_double() + other.as_double()),
        }
    }

    /// Subtract `other` from this value
    pub fn sub(&self, other: &Value) -> Value {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => Value::Long(a.wrapping_sub(*b)),
            _ => Value::Double(self.as_double() - other.as_double()),
        }
    }

    /// Compare numerically, widening integers when kinds differ
    pub fn greater_than(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => a > b,
            _ => self.as_double() > other.as_double(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Long(0)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_arithmetic() {
        let a = Value::Long(100);
        let b = Value::Long(30);
        assert_eq!(a.sub(&b), Value::Long(70));
        assert_eq!(a.add(&b), Value::Long(130));
        assert!(a.greater_than(&b));
    }

    #[test]
    fn test_mixed_arithmetic_widens() {
        let a = Value::Long(1);
        let b = Value::Double(0.5);
        assert_eq!(a.add(&b), Value::Double(1.5));
        assert!(a.greater_than(&b));
    }

    #[test]
    fn test_as_long_mismatch() {
        let err = Value::Double(1.0).as_long().unwrap_err();
        assert_eq!(
            err,
            PrimitiveError::TypeMismatch {
                expected: "long",
                found: "double"
            }
        );
    }
}
