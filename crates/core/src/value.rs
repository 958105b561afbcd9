//! Scalar metadata values.
//!
//! Item metadata maps string keys to scalar values. There are exactly four
//! value types; no arrays, no nesting, no implicit coercions.
//!
//! ## Type rules
//!
//! - `Int(1) != Float(1.0)` — different types are never equal
//! - Float equality follows IEEE-754: `NaN != NaN`, `-0.0 == 0.0`
//! - Cross-type numeric *comparison* exists only in predicate evaluation
//!   (see [`MetadataValue::partial_cmp_numeric`]), never in equality

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Scalar value stored under a metadata key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MetadataValue {
    /// UTF-8 string
    Str(String),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// Boolean
    Bool(bool),
}

// Custom PartialEq: different types are never equal, floats use IEEE-754.
impl PartialEq for MetadataValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MetadataValue::Str(a), MetadataValue::Str(b)) => a == b,
            (MetadataValue::Int(a), MetadataValue::Int(b)) => a == b,
            (MetadataValue::Float(a), MetadataValue::Float(b)) => a == b,
            (MetadataValue::Bool(a), MetadataValue::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl MetadataValue {
    /// Get the type name as a string (for error messages).
    pub fn type_name(&self) -> &'static str {
        match self {
            MetadataValue::Str(_) => "Str",
            MetadataValue::Int(_) => "Int",
            MetadataValue::Float(_) => "Float",
            MetadataValue::Bool(_) => "Bool",
        }
    }

    /// Check if this value is numeric (Int or Float).
    pub fn is_numeric(&self) -> bool {
        matches!(self, MetadataValue::Int(_) | MetadataValue::Float(_))
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Int(v) => Some(*v as f64),
            MetadataValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Compare two values for ordering predicates.
    ///
    /// Int and Float compare numerically against each other (as f64).
    /// Everything else is incomparable and returns `None`, which predicate
    /// evaluation treats as non-matching.
    pub fn partial_cmp_numeric(&self, other: &MetadataValue) -> Option<Ordering> {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Str(v) => write!(f, "{}", v),
            MetadataValue::Int(v) => write!(f, "{}", v),
            MetadataValue::Float(v) => write!(f, "{}", v),
            MetadataValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<i32> for MetadataValue {
    fn from(v: i32) -> Self {
        MetadataValue::Int(v as i64)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_cross_type_equality() {
        assert_ne!(MetadataValue::Int(1), MetadataValue::Float(1.0));
        assert_ne!(MetadataValue::Str("1".into()), MetadataValue::Int(1));
        assert_ne!(MetadataValue::Bool(true), MetadataValue::Int(1));
    }

    #[test]
    fn test_float_ieee754_equality() {
        assert_ne!(
            MetadataValue::Float(f64::NAN),
            MetadataValue::Float(f64::NAN)
        );
        assert_eq!(MetadataValue::Float(-0.0), MetadataValue::Float(0.0));
    }

    #[test]
    fn test_numeric_comparison_crosses_int_float() {
        let one = MetadataValue::Int(1);
        let one_and_a_half = MetadataValue::Float(1.5);
        assert_eq!(
            one.partial_cmp_numeric(&one_and_a_half),
            Some(Ordering::Less)
        );
        assert_eq!(
            MetadataValue::Float(2.0).partial_cmp_numeric(&MetadataValue::Int(2)),
            Some(Ordering::Equal)
        );
    }

    #[test]
    fn test_non_numeric_comparison_is_none() {
        let s = MetadataValue::from("abc");
        let b = MetadataValue::Bool(true);
        assert_eq!(s.partial_cmp_numeric(&MetadataValue::Int(1)), None);
        assert_eq!(b.partial_cmp_numeric(&MetadataValue::Bool(false)), None);
    }

    #[test]
    fn test_from_conversions() {
        let _: MetadataValue = "s".into();
        let _: MetadataValue = String::from("s").into();
        let _: MetadataValue = 42i64.into();
        let _: MetadataValue = 42i32.into();
        let _: MetadataValue = 0.5f64.into();
        let _: MetadataValue = true.into();
    }

    #[test]
    fn test_type_names() {
        assert_eq!(MetadataValue::from("x").type_name(), "Str");
        assert_eq!(MetadataValue::Int(0).type_name(), "Int");
        assert_eq!(MetadataValue::Float(0.0).type_name(), "Float");
        assert_eq!(MetadataValue::Bool(false).type_name(), "Bool");
    }
}
