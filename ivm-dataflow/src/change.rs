use std::collections::BTreeMap;

use ivm_data::Row;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The unit of output of an operator: a row plus its named relationships to
/// other nodes (spec §3). Relationship sequences are realized eagerly here
/// — once a [`Node`] is embedded in a [`Change`] it has already crossed the
/// fetch/cleanup boundary where laziness matters (see [`crate::lazy`]).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub row: Row,
    pub relationships: BTreeMap<String, Vec<Node>>,
}

impl Node {
    pub fn new(row: Row) -> Self {
        Node {
            row,
            relationships: BTreeMap::new(),
        }
    }

    /// Attach (or replace) a named relationship on this node, returning
    /// `self` for chaining the way a builder does.
    pub fn with_relationship(mut self, name: impl Into<String>, children: Vec<Node>) -> Self {
        self.relationships.insert(name.into(), children);
        self
    }
}

/// A tagged delta describing how a materialized result must change (spec
/// §3). This is the closed set of variants the entire engine speaks in,
/// from the output of the topmost operator down to what a [`crate::View`]
/// applies.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    /// A new node, with its full relationship subtree, has appeared.
    Add(Node),
    /// A node, with its full relationship subtree, has disappeared.
    Remove(Node),
    /// An in-place value change: primary-key columns are unchanged between
    /// `old_row` and `row`.
    Edit { old_row: Row, row: Row },
    /// A change nested inside the named relationship of the given parent
    /// row.
    Child {
        row: Row,
        relationship: String,
        change: Box<Change>,
    },
}

impl Change {
    pub fn child(row: Row, relationship: impl Into<String>, change: Change) -> Self {
        Change::Child {
            row,
            relationship: relationship.into(),
            change: Box::new(change),
        }
    }
}

/// The on-the-wire shape of a [`Change`] (spec §6): `{type: "add" |
/// "remove" | "edit" | "child", ...}`, with the variant-specific fields spec
/// §6 names. Kept as a private DTO rather than deriving this shape directly
/// on [`Change`] because `Add`/`Remove` need their payload nested under a
/// `node` key while `Edit` flattens its two rows and `Child` nests a
/// further `relationshipName`/`change` pair — no single `#[serde(tag =
/// ..)]` shape expresses all four, so it is hand-written the same way a
/// wire DTO with a genuinely irregular shape gets a manual `Serialize`
/// impl instead of forcing a derive to fit it.
#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum ChangeWire {
    Add { node: Node },
    Remove { node: Node },
    Edit { old_row: Row, row: Row },
    Child { row: Row, child: ChildWire },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChildWire {
    relationship_name: String,
    change: Box<ChangeWire>,
}

impl From<&Change> for ChangeWire {
    fn from(change: &Change) -> Self {
        match change {
            Change::Add(node) => ChangeWire::Add { node: node.clone() },
            Change::Remove(node) => ChangeWire::Remove { node: node.clone() },
            Change::Edit { old_row, row } => ChangeWire::Edit {
                old_row: old_row.clone(),
                row: row.clone(),
            },
            Change::Child {
                row,
                relationship,
                change,
            } => ChangeWire::Child {
                row: row.clone(),
                child: ChildWire {
                    relationship_name: relationship.clone(),
                    change: Box::new(ChangeWire::from(change.as_ref())),
                },
            },
        }
    }
}

impl From<ChangeWire> for Change {
    fn from(wire: ChangeWire) -> Self {
        match wire {
            ChangeWire::Add { node } => Change::Add(node),
            ChangeWire::Remove { node } => Change::Remove(node),
            ChangeWire::Edit { old_row, row } => Change::Edit { old_row, row },
            ChangeWire::Child { row, child } => Change::Child {
                row,
                relationship: child.relationship_name,
                change: Box::new(Change::from(*child.change)),
            },
        }
    }
}

impl Serialize for Change {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ChangeWire::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Change {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        ChangeWire::deserialize(deserializer).map(Change::from)
    }
}

/// A primitive leaf-level change accepted by a [`crate::Source`] (spec §3).
///
/// `Edit` may or may not change primary-key columns. A source decomposes a
/// PK-changing edit into `Remove(old)` followed by `Add(new)` at the source
/// boundary (spec §4.1, §9's second Open Question); everything above the
/// source only ever sees PK-preserving edits as a single [`Change::Edit`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceChange {
    Add(Row),
    Remove(Row),
    Edit { old_row: Row, row: Row },
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_data::Value;

    fn row(id: &str) -> Row {
        Row::new([("id".to_string(), Value::from(id))])
    }

    #[test]
    fn add_serializes_to_the_declared_wire_shape() {
        let change = Change::Add(Node::new(row("i1")));
        let value: serde_json::Value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["type"], "add");
        assert_eq!(value["node"]["row"]["id"], "i1");
    }

    #[test]
    fn child_nests_relationship_name_and_inner_change() {
        let change = Change::child(row("i1"), "comments", Change::Add(Node::new(row("c1"))));
        let value: serde_json::Value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["type"], "child");
        assert_eq!(value["row"]["id"], "i1");
        assert_eq!(value["child"]["relationshipName"], "comments");
        assert_eq!(value["child"]["change"]["type"], "add");
        assert_eq!(value["child"]["change"]["node"]["row"]["id"], "c1");
    }

    #[test]
    fn change_round_trips_through_json() {
        let change = Change::Edit {
            old_row: row("i1"),
            row: row("i1"),
        };
        let json = serde_json::to_string(&change).unwrap();
        let restored: Change = serde_json::from_str(&json).unwrap();
        assert_eq!(change, restored);
    }
}
