use std::cmp::Ordering as CmpOrdering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A single primitive cell value, per spec §3: "an unordered mapping from
/// column name to a primitive value (string, finite number, boolean,
/// null)".
///
/// `Number` is restricted to finite values (`is_finite()`); callers that
/// construct a `Value::Number` directly from untrusted input should check
/// this themselves; `Value::number` asserts it in debug builds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl Value {
    /// Construct a `Value::Number`, asserting finiteness in debug builds.
    pub fn number(n: f64) -> Self {
        debug_assert!(n.is_finite(), "Value::Number must be finite, got {n}");
        Value::Number(n)
    }

    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Ordinal used to order values of different variants in a total order:
    /// `Null < Bool < Number < Text`.
    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::Text(_) => 3,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == CmpOrdering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        match (self, other) {
            (Value::Null, Value::Null) => CmpOrdering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            // Hash the exact bit pattern, matching the `total_cmp`-based
            // `Ord`/`Eq` impls above, which distinguish -0.0 from 0.0.
            Value::Number(n) => n.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::number(n as f64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::number(n)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_order_across_variants() {
        let mut values = vec![
            Value::text("b"),
            Value::Null,
            Value::number(1.0),
            Value::Bool(true),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::number(1.0),
                Value::text("b"),
            ]
        );
    }

    #[test]
    fn equal_numbers_hash_equal() {
        use std::collections::hash_map::DefaultHasher;
        let mut h1 = DefaultHasher::new();
        let mut h2 = DefaultHasher::new();
        Value::number(2.5).hash(&mut h1);
        Value::number(2.5).hash(&mut h2);
        assert_eq!(h1.finish(), h2.finish());
    }
}
