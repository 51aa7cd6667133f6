//! Component values.
//!
//! Components that carry data store one [`Value`] per entity in a table
//! column. Tags and data-less pairs have no column at all.

use core::cmp::Ordering;

/// A value stored in a component column.
///
/// Values are totally ordered so that order_by comparators can sort any
/// column: `Null` first, then numbers compared across variants, with NaN
/// after every other number.
#[derive(Clone, Copy, Debug)]
pub enum Value {
    /// Data of a component added without a value.
    Null,
    Int64(i64),
    Float64(f64),
}

impl Value {
    /// Returns the integer, if this is an `Int64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            Value::Null => None,
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        if let (Value::Int64(a), Value::Int64(b)) = (self, other) {
            return a.cmp(b);
        }
        match (self.as_number(), other.as_number()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.is_nan().cmp(&b.is_nan()).then_with(|| {
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}
