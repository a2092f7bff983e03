use ivm_data::{Constraint, Row, Value};
use ivm_errors::IvmResult;

use crate::change::{Change, Node};
use crate::lazy::LazyNodes;
use crate::pipeline::{NodeId, Pipeline};

/// A comparison operator for [`Predicate::Compare`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    fn holds(self, lhs: &Value, rhs: &Value) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }
}

/// A row predicate. Spec §4.5 names `Filter(predicate)` without fixing its
/// shape; the predicate surface excluded from scope is general SQL
/// expression evaluation (spec §1's Non-goals), not boolean composition of
/// column comparisons, so this stays a small closed enum rather than an
/// embedded expression evaluator.
#[derive(Clone, Debug)]
pub enum Predicate {
    Eq(Constraint),
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq(Constraint::new(column, value))
    }

    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn holds(&self, row: &Row) -> bool {
        match self {
            Predicate::Eq(c) => c.matches(row),
            Predicate::Compare { column, op, value } => row
                .get(column)
                .is_some_and(|v| op.holds(v, value)),
            Predicate::And(preds) => preds.iter().all(|p| p.holds(row)),
            Predicate::Or(preds) => preds.iter().any(|p| p.holds(row)),
            Predicate::Not(p) => !p.holds(row),
        }
    }
}

/// Forwards add/remove/edit iff `predicate` holds, decomposing an edit
/// that crosses the predicate boundary into the equivalent add or remove
/// (spec §4.5).
#[derive(Debug)]
pub struct FilterNode {
    upstream: NodeId,
    predicate: Predicate,
    pub(crate) output: Option<NodeId>,
}

impl FilterNode {
    pub fn new(upstream: NodeId, predicate: Predicate) -> Self {
        FilterNode {
            upstream,
            predicate,
            output: None,
        }
    }

    pub fn push(&mut self, pipeline: &Pipeline, self_id: NodeId, change: Change) -> IvmResult<()> {
        let Some(output) = self.output else {
            return Ok(());
        };
        let forwarded = match change {
            Change::Add(node) => self.predicate.holds(&node.row).then_some(Change::Add(node)),
            Change::Remove(node) => self
                .predicate
                .holds(&node.row)
                .then_some(Change::Remove(node)),
            Change::Edit { old_row, row } => {
                let old_ok = self.predicate.holds(&old_row);
                let new_ok = self.predicate.holds(&row);
                match (old_ok, new_ok) {
                    (true, true) => Some(Change::Edit { old_row, row }),
                    (false, true) => Some(Change::Add(Node::new(row))),
                    (true, false) => Some(Change::Remove(Node::new(old_row))),
                    (false, false) => None,
                }
            }
            child @ Change::Child { .. } => Some(child),
        };
        if let Some(change) = forwarded {
            pipeline.push(output, self_id, change)?;
        }
        Ok(())
    }

    pub fn fetch(&self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let nodes = pipeline
            .fetch(self.upstream, constraints)?
            .filter(|n| self.predicate.holds(&n.row))
            .collect::<Vec<_>>();
        Ok(LazyNodes::new(nodes))
    }

    pub fn cleanup(&mut self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let nodes = pipeline
            .cleanup(self.upstream, constraints)?
            .filter(|n| self.predicate.holds(&n.row))
            .collect::<Vec<_>>();
        Ok(LazyNodes::new(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_data::Value;

    fn row(status: &str) -> Row {
        Row::new([("status".to_string(), Value::from(status))])
    }

    #[test]
    fn edit_crossing_predicate_becomes_remove() {
        let pred = Predicate::eq("status", "open");
        assert!(pred.holds(&row("open")));
        assert!(!pred.holds(&row("closed")));
    }
}
