use std::cmp::Ordering as CmpOrdering;

use ivm_errors::{IvmError, IvmResult};
use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::row::Row;

/// An ordered, non-empty tuple of column names declared per source (spec
/// §3). Every row in the owning source has distinct values on these
/// columns.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey(Vec<String>);

impl PrimaryKey {
    pub fn new(columns: Vec<String>) -> IvmResult<Self> {
        if columns.is_empty() {
            return Err(IvmError::InvalidSchema(
                "primary key must have at least one column".into(),
            ));
        }
        let mut sorted = columns.clone();
        sorted.sort();
        sorted.dedup();
        if sorted.len() != columns.len() {
            return Err(IvmError::InvalidSchema(format!(
                "primary key columns must be distinct: {columns:?}"
            )));
        }
        Ok(PrimaryKey(columns))
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    pub fn key_for(&self, row: &Row) -> Key {
        row.key_for(&self.0)
    }
}

/// Sort direction for one column of an [`Ordering`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

/// One `(column, direction)` pair of an [`Ordering`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderColumn {
    pub column: String,
    pub direction: Direction,
}

impl OrderColumn {
    pub fn asc(column: impl Into<String>) -> Self {
        OrderColumn {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        OrderColumn {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// A total order over a source's rows: the caller-specified sort columns,
/// closed under appending the primary key (spec §3, §6).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering(Vec<OrderColumn>);

impl Ordering {
    pub fn new(columns: Vec<OrderColumn>) -> Self {
        Ordering(columns)
    }

    /// Append any primary-key columns not already present, ascending,
    /// guaranteeing totality — every row compares distinct under the
    /// resulting ordering since primary-key values are unique per row.
    pub fn canonicalize(mut self, pk: &PrimaryKey) -> Self {
        for col in pk.columns() {
            if !self.0.iter().any(|oc| &oc.column == col) {
                self.0.push(OrderColumn::asc(col.clone()));
            }
        }
        self
    }

    pub fn columns(&self) -> &[OrderColumn] {
        &self.0
    }

    /// Extract the composite sort key for `row`, used as the key of a
    /// secondary ordered index.
    pub fn sort_key(&self, row: &Row) -> SortKey {
        SortKey(
            self.0
                .iter()
                .map(|oc| {
                    let v = row
                        .get(&oc.column)
                        .unwrap_or_else(|| panic!("row missing ordering column {:?}", oc.column))
                        .clone();
                    (v, oc.direction)
                })
                .collect(),
        )
    }

    pub fn compare_rows(&self, a: &Row, b: &Row) -> CmpOrdering {
        self.sort_key(a).cmp(&self.sort_key(b))
    }
}

/// The value of an [`Ordering`] evaluated against one row: orders strictly
/// ascending overall once the primary key has been appended by
/// [`Ordering::canonicalize`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SortKey(Vec<(crate::value::Value, Direction)>);

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        for ((a, dir), (b, _)) in self.0.iter().zip(other.0.iter()) {
            let ord = a.cmp(b);
            let ord = match dir {
                Direction::Asc => ord,
                Direction::Desc => ord.reverse(),
            };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(id: i64, name: &str) -> Row {
        Row::new([
            ("id".to_string(), Value::from(id)),
            ("name".to_string(), Value::from(name)),
        ])
    }

    #[test]
    fn canonicalize_appends_missing_pk() {
        let pk = PrimaryKey::new(vec!["id".into()]).unwrap();
        let ordering = Ordering::new(vec![OrderColumn::asc("name")]).canonicalize(&pk);
        assert_eq!(ordering.columns().len(), 2);
        assert_eq!(ordering.columns()[1].column, "id");
    }

    #[test]
    fn ordering_is_total_once_canonicalized() {
        let pk = PrimaryKey::new(vec!["id".into()]).unwrap();
        let ordering = Ordering::new(vec![OrderColumn::asc("name")]).canonicalize(&pk);
        let a = row(1, "same");
        let b = row(2, "same");
        assert_ne!(ordering.compare_rows(&a, &b), CmpOrdering::Equal);
    }
}
