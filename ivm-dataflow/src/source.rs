use std::collections::BTreeMap;

use ivm_data::{Constraint, Key, Ordering, PrimaryKey, Row, SortKey, Value};
use ivm_errors::{IvmError, IvmResult};

use crate::change::{Change, Node, SourceChange};
use crate::hash_index::HashIndex;
use crate::lazy::LazyNodes;
use crate::pipeline::NodeId;

/// The declared type of one column (spec §6's schema declaration). Carries
/// no behavior of its own; it exists so a caller can validate the shape of
/// rows it feeds into a source before pushing them, the way a column's
/// declared storage type anchors validation in a typed relational engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Bool,
    Number,
    Text,
}

/// One column's declared type plus whether `Null` is a legal value for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub ty: ColumnType,
    pub optional: bool,
}

impl ColumnSpec {
    pub fn new(ty: ColumnType, optional: bool) -> Self {
        ColumnSpec { ty, optional }
    }
}

/// `{name, columns, primaryKey}` (spec §6). Validated once at construction;
/// every later operation trusts it.
#[derive(Clone, Debug)]
pub struct SourceSchema {
    pub name: String,
    pub columns: BTreeMap<String, ColumnSpec>,
    pub primary_key: PrimaryKey,
}

impl SourceSchema {
    pub fn new(
        name: impl Into<String>,
        columns: BTreeMap<String, ColumnSpec>,
        primary_key: PrimaryKey,
    ) -> IvmResult<Self> {
        for col in primary_key.columns() {
            if !columns.contains_key(col) {
                return Err(IvmError::InvalidSchema(format!(
                    "primary key column {col:?} is not a declared column"
                )));
            }
        }
        Ok(SourceSchema {
            name: name.into(),
            columns,
            primary_key,
        })
    }
}

/// The authoritative owner of one table's rows (spec §4.1): a `BTreeMap`
/// keyed by primary key, one ordered secondary index per distinct
/// requested ordering beyond the primary key's own, any number of hash
/// indices built on demand, and the list of connections to fan changes out
/// to, in registration order.
#[derive(Debug)]
pub struct SourceNode {
    schema: SourceSchema,
    rows: BTreeMap<Key, Row>,
    // `Ordering` has no total order of its own (it's a list of sort
    // columns, not a sortable value), so distinct requested orderings are
    // kept as a small linear table rather than a map key — the expected
    // number of live orderings per source is the number of distinct
    // connections against it, not the row count.
    secondary_indices: Vec<(Ordering, BTreeMap<SortKey, Key>)>,
    hash_indices: BTreeMap<String, HashIndex>,
    connections: Vec<NodeId>,
}

impl SourceNode {
    pub fn new(schema: SourceSchema) -> Self {
        SourceNode {
            schema,
            rows: BTreeMap::new(),
            secondary_indices: Vec::new(),
            hash_indices: BTreeMap::new(),
            connections: Vec::new(),
        }
    }

    pub fn schema(&self) -> &SourceSchema {
        &self.schema
    }

    pub(crate) fn register_connection(&mut self, connection: NodeId) {
        self.connections.push(connection);
    }

    pub(crate) fn connections(&self) -> &[NodeId] {
        &self.connections
    }

    /// Ensure a secondary ordered index exists for `ordering`, populating it
    /// from the current row set if it is new.
    pub(crate) fn ensure_ordering(&mut self, ordering: &Ordering) {
        if self.secondary_indices.iter().any(|(o, _)| o == ordering) {
            return;
        }
        let mut index = BTreeMap::new();
        for (pk, row) in &self.rows {
            index.insert(ordering.sort_key(row), pk.clone());
        }
        self.secondary_indices.push((ordering.clone(), index));
    }

    fn index_for(&self, ordering: &Ordering) -> &BTreeMap<SortKey, Key> {
        &self
            .secondary_indices
            .iter()
            .find(|(o, _)| o == ordering)
            .expect("ensure_ordering just populated this")
            .1
    }

    pub fn get_or_create_and_maintain_hash_index(&mut self, column: &str) -> &HashIndex {
        if !self.hash_indices.contains_key(column) {
            let mut idx = HashIndex::new(column);
            for (pk, row) in &self.rows {
                if let Some(v) = row.get(column) {
                    idx.insert(v.clone(), pk.clone());
                }
            }
            self.hash_indices.insert(column.to_string(), idx);
        }
        self.hash_indices.get(column).expect("just inserted")
    }

    fn pk_of(&self, row: &Row) -> Key {
        self.schema.primary_key.key_for(row)
    }

    /// Apply one primitive change, returning the derived [`Change`](s) to
    /// fan out to every connection, in the order they must be delivered.
    /// A PK-changing edit decomposes into exactly two entries: `Remove`
    /// then `Add` (spec §4.1, §9).
    pub fn apply(&mut self, change: SourceChange) -> IvmResult<Vec<Change>> {
        match change {
            SourceChange::Add(row) => {
                let pk = self.pk_of(&row);
                if self.rows.contains_key(&pk) {
                    return Err(IvmError::DuplicatePrimaryKey(format!("{pk:?}")));
                }
                self.insert_indices(&pk, &row);
                self.rows.insert(pk, row.clone());
                Ok(vec![Change::Add(Node::new(row))])
            }
            SourceChange::Remove(row) => {
                let pk = self.pk_of(&row);
                match self.rows.get(&pk) {
                    Some(existing) if existing == &row => {}
                    _ => return Err(IvmError::NotFound(format!("{pk:?}"))),
                }
                self.remove_indices(&pk, &row);
                self.rows.remove(&pk);
                Ok(vec![Change::Remove(Node::new(row))])
            }
            SourceChange::Edit { old_row, row } => {
                let old_pk = self.pk_of(&old_row);
                let new_pk = self.pk_of(&row);
                match self.rows.get(&old_pk) {
                    Some(existing) if existing == &old_row => {}
                    _ => return Err(IvmError::NotFound(format!("{old_pk:?}"))),
                }
                if old_pk == new_pk {
                    self.remove_indices(&old_pk, &old_row);
                    self.insert_indices(&new_pk, &row);
                    self.rows.insert(new_pk, row.clone());
                    Ok(vec![Change::Edit {
                        old_row,
                        row,
                    }])
                } else {
                    if self.rows.contains_key(&new_pk) {
                        return Err(IvmError::DuplicatePrimaryKey(format!("{new_pk:?}")));
                    }
                    self.remove_indices(&old_pk, &old_row);
                    self.rows.remove(&old_pk);
                    self.insert_indices(&new_pk, &row);
                    self.rows.insert(new_pk, row.clone());
                    Ok(vec![
                        Change::Remove(Node::new(old_row)),
                        Change::Add(Node::new(row)),
                    ])
                }
            }
        }
    }

    fn insert_indices(&mut self, pk: &Key, row: &Row) {
        for (ordering, index) in &mut self.secondary_indices {
            index.insert(ordering.sort_key(row), pk.clone());
        }
        for (column, index) in &mut self.hash_indices {
            if let Some(v) = row.get(column) {
                index.insert(v.clone(), pk.clone());
            }
        }
    }

    fn remove_indices(&mut self, pk: &Key, row: &Row) {
        for (ordering, index) in &mut self.secondary_indices {
            index.remove(&ordering.sort_key(row));
        }
        for (column, index) in &mut self.hash_indices {
            if let Some(v) = row.get(column) {
                index.remove(v, pk);
            }
        }
    }

    /// Produce rows matching every constraint in `constraints`, in
    /// `ordering`, as [`Node`]s with empty relationships.
    pub fn fetch(&mut self, ordering: &Ordering, constraints: &[Constraint]) -> LazyNodes {
        self.ensure_ordering(ordering);
        let nodes = self
            .index_for(ordering)
            .values()
            .filter_map(|pk| self.rows.get(pk))
            .filter(|row| constraints.iter().all(|c| c.matches(row)))
            .cloned()
            .map(Node::new)
            .collect::<Vec<_>>();
        LazyNodes::new(nodes)
    }

    /// Produce rows with `column == value`, via the hash index on `column`
    /// rather than a full ordered scan (spec §4.2: "used by joins as the
    /// fast side"). The candidate set returned by the index is typically
    /// small (one join key's worth of matches), so sorting just that set
    /// into `ordering` is cheap compared to scanning every row in the
    /// source to find it.
    pub fn fetch_equals(
        &mut self,
        column: &str,
        value: &Value,
        ordering: &Ordering,
        extra_constraints: &[Constraint],
    ) -> LazyNodes {
        let keys: Vec<Key> = {
            let index = self.get_or_create_and_maintain_hash_index(column);
            index.get(value).cloned().collect()
        };
        let mut nodes = keys
            .iter()
            .filter_map(|pk| self.rows.get(pk))
            .filter(|row| extra_constraints.iter().all(|c| c.matches(row)))
            .cloned()
            .map(Node::new)
            .collect::<Vec<_>>();
        nodes.sort_by(|a, b| ordering.compare_rows(&a.row, &b.row));
        LazyNodes::new(nodes)
    }
}

/// A named view of a source producing rows in a fixed ordering, with an
/// optional set of equality predicates the connection always applies
/// (spec §4.1). Treated as an implicit `Filter` at both `fetch` and `push`
/// time, so `applied_filters` is always `true` in this engine: a
/// connection never asks its caller to re-check what it has already
/// enforced.
#[derive(Debug)]
pub struct ConnectionNode {
    pub(crate) source: NodeId,
    pub(crate) ordering: Ordering,
    pub(crate) optional_filters: Vec<Constraint>,
    pub(crate) output: Option<NodeId>,
}

impl ConnectionNode {
    pub fn new(source: NodeId, ordering: Ordering, optional_filters: Vec<Constraint>) -> Self {
        ConnectionNode {
            source,
            ordering,
            optional_filters,
            output: None,
        }
    }

    pub fn applied_filters(&self) -> bool {
        true
    }

    pub(crate) fn set_output(&mut self, output: NodeId) {
        self.output = Some(output);
    }

    fn passes(&self, row: &Row) -> bool {
        self.optional_filters.iter().all(|c| c.matches(row))
    }

    /// Filter a node against this connection's own predicates, the same
    /// way it would be filtered on an equivalent `fetch`.
    pub(crate) fn admit(&self, change: &Change) -> Option<Change> {
        if self.optional_filters.is_empty() {
            return Some(change.clone());
        }
        match change {
            Change::Add(node) => self.passes(&node.row).then(|| change.clone()),
            Change::Remove(node) => self.passes(&node.row).then(|| change.clone()),
            Change::Edit { old_row, row } => {
                let old_ok = self.passes(old_row);
                let new_ok = self.passes(row);
                match (old_ok, new_ok) {
                    (true, true) => Some(change.clone()),
                    (false, true) => Some(Change::Add(Node::new(row.clone()))),
                    (true, false) => Some(Change::Remove(Node::new(old_row.clone()))),
                    (false, false) => None,
                }
            }
            Change::Child { row, .. } => self.passes(row).then(|| change.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_data::Value;
    use std::collections::BTreeMap as Map;

    fn schema() -> SourceSchema {
        let mut columns = Map::new();
        columns.insert("id".to_string(), ColumnSpec::new(ColumnType::Text, false));
        columns.insert("name".to_string(), ColumnSpec::new(ColumnType::Text, false));
        SourceSchema::new("issues", columns, PrimaryKey::new(vec!["id".into()]).unwrap()).unwrap()
    }

    fn row(id: &str, name: &str) -> Row {
        Row::new([
            ("id".to_string(), Value::from(id)),
            ("name".to_string(), Value::from(name)),
        ])
    }

    #[test]
    fn add_rejects_duplicate_pk() {
        let mut src = SourceNode::new(schema());
        src.apply(SourceChange::Add(row("i1", "a"))).unwrap();
        let err = src.apply(SourceChange::Add(row("i1", "b"))).unwrap_err();
        assert!(matches!(err, IvmError::DuplicatePrimaryKey(_)));
    }

    #[test]
    fn remove_requires_exact_row_match() {
        let mut src = SourceNode::new(schema());
        src.apply(SourceChange::Add(row("i1", "a"))).unwrap();
        let err = src
            .apply(SourceChange::Remove(row("i1", "different")))
            .unwrap_err();
        assert!(matches!(err, IvmError::NotFound(_)));
    }

    #[test]
    fn pk_changing_edit_decomposes_into_remove_then_add() {
        let mut src = SourceNode::new(schema());
        src.apply(SourceChange::Add(row("i1", "a"))).unwrap();
        let changes = src
            .apply(SourceChange::Edit {
                old_row: row("i1", "a"),
                row: row("i2", "a"),
            })
            .unwrap();
        assert_eq!(changes.len(), 2);
        assert!(matches!(changes[0], Change::Remove(_)));
        assert!(matches!(changes[1], Change::Add(_)));
    }

    #[test]
    fn fetch_respects_ordering_and_constraint() {
        let mut src = SourceNode::new(schema());
        src.apply(SourceChange::Add(row("i2", "b"))).unwrap();
        src.apply(SourceChange::Add(row("i1", "a"))).unwrap();
        let ordering = Ordering::new(vec![]).canonicalize(&src.schema().primary_key);
        let fetched = src.fetch(&ordering, &[]).drain_all();
        assert_eq!(fetched[0].row.get("id"), Some(&Value::from("i1")));
        assert_eq!(fetched[1].row.get("id"), Some(&Value::from("i2")));

        let constraint = Constraint::new("id", "i2");
        let fetched = src.fetch(&ordering, &[constraint]).drain_all();
        assert_eq!(fetched.len(), 1);
    }

    #[test]
    fn fetch_equals_uses_hash_index_and_orders_the_match_set() {
        let mut src = SourceNode::new(schema());
        src.apply(SourceChange::Add(row("i2", "shared"))).unwrap();
        src.apply(SourceChange::Add(row("i1", "shared"))).unwrap();
        src.apply(SourceChange::Add(row("i3", "other"))).unwrap();
        let ordering = Ordering::new(vec![]).canonicalize(&src.schema().primary_key);

        let fetched = src
            .fetch_equals("name", &Value::from("shared"), &ordering, &[])
            .drain_all();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].row.get("id"), Some(&Value::from("i1")));
        assert_eq!(fetched[1].row.get("id"), Some(&Value::from("i2")));

        // The index is built lazily on first use and reused afterward.
        assert!(src.hash_indices.contains_key("name"));
    }
}
