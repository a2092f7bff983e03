use serde::{Deserialize, Serialize};

use crate::row::Row;
use crate::value::Value;

/// An equality predicate `column = value`, used to scope a `fetch`/`cleanup`
/// call (spec §3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    pub column: String,
    pub value: Value,
}

impl Constraint {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Constraint {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}
