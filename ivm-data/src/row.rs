use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::value::Value;

/// An immutable, unordered mapping from column name to [`Value`] (spec §3).
///
/// Backed by a `BTreeMap` rather than a `HashMap` so that two rows built
/// from the same columns/values compare and hash identically regardless of
/// construction order — needed since `Row` is used as (part of) a scratch
/// key and as the unit of deep equality the invariants in spec §3 require.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Row(BTreeMap<String, Value>);

impl Row {
    pub fn new(columns: impl IntoIterator<Item = (String, Value)>) -> Self {
        Row(columns.into_iter().collect())
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Extract the ordered tuple of values for `columns`, used to build a
    /// primary-key or join-key [`Key`]. Panics if a named column is absent —
    /// callers only ever pass columns declared in the owning schema.
    #[track_caller]
    pub fn key_for(&self, columns: &[String]) -> Key {
        Key::new(
            columns
                .iter()
                .map(|c| {
                    self.get(c)
                        .unwrap_or_else(|| panic!("row missing declared column {c:?}"))
                        .clone()
                })
                .collect::<Vec<_>>(),
        )
    }
}

impl FromIterator<(String, Value)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Row(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    /// Rows cross the source/view boundary into serialized form wherever a
    /// [`Change`](https://docs.rs/ivm-dataflow) is handed to a transport
    /// layer (spec §6); a round trip through JSON must preserve every
    /// column regardless of insertion order, since `Row` is unordered.
    #[test]
    fn json_round_trip_preserves_columns() {
        let row = Row::new([
            ("id".to_string(), Value::from("i1")),
            ("title".to_string(), Value::from("first")),
            ("closed".to_string(), Value::from(false)),
        ]);
        let json = serde_json::to_string(&row).unwrap();
        let restored: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(row, restored);
    }
}
