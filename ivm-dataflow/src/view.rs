use std::collections::BTreeMap;

use ivm_data::Ordering;
use ivm_errors::{IvmError, IvmResult};

use crate::change::{Change, Node};

/// Describes, recursively, how one level of a materialized view is shaped:
/// its sort order, whether it holds at most one node, and the shape of
/// each named nested relationship (spec §4.6). The view has no other way
/// to learn a relationship's declared ordering once it only receives
/// [`Change::Child`] envelopes for it, so this is supplied up front.
#[derive(Clone, Debug)]
pub struct ViewSchema {
    pub ordering: Ordering,
    pub singular: bool,
    pub relationships: BTreeMap<String, ViewSchema>,
}

impl ViewSchema {
    pub fn new(ordering: Ordering, singular: bool) -> Self {
        ViewSchema {
            ordering,
            singular,
            relationships: BTreeMap::new(),
        }
    }

    pub fn with_relationship(mut self, name: impl Into<String>, schema: ViewSchema) -> Self {
        self.relationships.insert(name.into(), schema);
        self
    }
}

fn locate(nodes: &[Node], row: &ivm_data::Row, ordering: &Ordering) -> Option<usize> {
    let key = ordering.sort_key(row);
    let pos = nodes.partition_point(|n| ordering.sort_key(&n.row) < key);
    if pos < nodes.len() && ordering.sort_key(&nodes[pos].row) == key {
        Some(pos)
    } else {
        None
    }
}

fn insert_sorted(nodes: &mut Vec<Node>, node: Node, ordering: &Ordering) {
    let key = ordering.sort_key(&node.row);
    let pos = nodes.partition_point(|n| ordering.sort_key(&n.row) < key);
    nodes.insert(pos, node);
}

/// Apply one [`Change`] to the sequence at one level of the view tree
/// (spec §4.6's algorithm), recursing into a named relationship's own
/// sequence for [`Change::Child`].
fn apply_at(nodes: &mut Vec<Node>, schema: &ViewSchema, change: Change) -> IvmResult<()> {
    match change {
        Change::Add(node) => {
            if schema.singular && !nodes.is_empty() {
                return Err(IvmError::InvariantViolation(format!(
                    "singular relationship received a second value: {:?}",
                    node.row
                )));
            }
            insert_sorted(nodes, node, &schema.ordering);
            Ok(())
        }
        Change::Remove(node) => match locate(nodes, &node.row, &schema.ordering) {
            Some(pos) => {
                nodes.remove(pos);
                Ok(())
            }
            None => Err(IvmError::InvariantViolation(format!(
                "remove for row not present in view: {:?}",
                node.row
            ))),
        },
        Change::Edit { old_row, row } => match locate(nodes, &old_row, &schema.ordering) {
            Some(pos) => {
                if schema.ordering.sort_key(&old_row) == schema.ordering.sort_key(&row) {
                    nodes[pos].row = row;
                } else {
                    let relationships = nodes.remove(pos).relationships;
                    let mut node = Node::new(row);
                    node.relationships = relationships;
                    insert_sorted(nodes, node, &schema.ordering);
                }
                Ok(())
            }
            None => Err(IvmError::InvariantViolation(format!(
                "edit for row not present in view: {old_row:?}"
            ))),
        },
        Change::Child {
            row,
            relationship,
            change,
        } => match locate(nodes, &row, &schema.ordering) {
            Some(pos) => {
                let child_schema = schema.relationships.get(&relationship).ok_or_else(|| {
                    IvmError::InvariantViolation(format!(
                        "view schema has no relationship named {relationship:?}"
                    ))
                })?;
                let children = nodes[pos]
                    .relationships
                    .entry(relationship)
                    .or_default();
                apply_at(children, child_schema, *change)
            }
            None => Err(IvmError::InvariantViolation(format!(
                "child change for a parent row not present in view: {row:?}"
            ))),
        },
    }
}

/// The terminal node of a pipeline (spec §4.6): maintains a mutable
/// ordered sequence of [`Node`]s with nested child arrays and flushes a
/// full snapshot to its listeners on `flush()`, not per-change — the view
/// decides when consumers see a consistent state, not the cascade that
/// fed it.
pub struct ViewNode {
    schema: ViewSchema,
    data: Vec<Node>,
    dirty: bool,
    listeners: Vec<Box<dyn Fn(&[Node]) + Send + Sync>>,
}

impl std::fmt::Debug for ViewNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewNode")
            .field("schema", &self.schema)
            .field("data", &self.data)
            .field("dirty", &self.dirty)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ViewNode {
    pub fn new(schema: ViewSchema) -> Self {
        ViewNode {
            schema,
            data: Vec::new(),
            dirty: false,
            listeners: Vec::new(),
        }
    }

    pub fn data(&self) -> &[Node] {
        &self.data
    }

    pub fn apply(&mut self, change: Change) -> IvmResult<()> {
        apply_at(&mut self.data, &self.schema, change)?;
        self.dirty = true;
        Ok(())
    }

    pub fn add_listener(&mut self, listener: Box<dyn Fn(&[Node]) + Send + Sync>) {
        self.listeners.push(listener);
    }

    /// Deliver the current snapshot to every listener, if anything has
    /// changed since the last flush (spec §4.6: batches notifications at
    /// transaction boundaries, not per `Change`).
    pub fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        for listener in &self.listeners {
            listener(&self.data);
        }
        self.dirty = false;
    }

    pub fn destroy(&mut self) {
        self.listeners.clear();
        self.data.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_data::{OrderColumn, Row, Value};

    fn row(id: i64) -> Row {
        Row::new([("id".to_string(), Value::from(id))])
    }

    fn schema() -> ViewSchema {
        ViewSchema::new(Ordering::new(vec![OrderColumn::asc("id")]), false)
    }

    #[test]
    fn add_inserts_in_order() {
        let mut data = Vec::new();
        let s = schema();
        apply_at(&mut data, &s, Change::Add(Node::new(row(2)))).unwrap();
        apply_at(&mut data, &s, Change::Add(Node::new(row(1)))).unwrap();
        assert_eq!(data[0].row.get("id"), Some(&Value::from(1_i64)));
        assert_eq!(data[1].row.get("id"), Some(&Value::from(2_i64)));
    }

    #[test]
    fn singular_rejects_second_add() {
        let mut data = Vec::new();
        let s = ViewSchema::new(Ordering::new(vec![OrderColumn::asc("id")]), true);
        apply_at(&mut data, &s, Change::Add(Node::new(row(1)))).unwrap();
        let err = apply_at(&mut data, &s, Change::Add(Node::new(row(2)))).unwrap_err();
        assert!(matches!(err, IvmError::InvariantViolation(_)));
    }

    #[test]
    fn child_recurses_into_named_relationship() {
        let mut data = Vec::new();
        let s = ViewSchema::new(Ordering::new(vec![OrderColumn::asc("id")]), false)
            .with_relationship(
                "comments",
                ViewSchema::new(Ordering::new(vec![OrderColumn::asc("id")]), false),
            );
        apply_at(&mut data, &s, Change::Add(Node::new(row(1)))).unwrap();
        apply_at(
            &mut data,
            &s,
            Change::child(row(1), "comments", Change::Add(Node::new(row(10)))),
        )
        .unwrap();
        assert_eq!(data[0].relationships["comments"].len(), 1);
    }
}
