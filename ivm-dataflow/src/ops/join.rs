use std::collections::HashSet;

use ivm_data::{Constraint, Row, Value};
use ivm_errors::{internal_err, IvmResult};

use crate::change::{Change, Node};
use crate::lazy::LazyNodes;
use crate::pipeline::{NodeId, Pipeline};

/// Composes parent rows with a fetched sequence of matching child nodes
/// under a named relationship, maintained incrementally (spec §4.4).
///
/// `scratch` is the primary-key-set: every `(childJoinValue, parentRow)`
/// pair currently live above this join. It stands in for a
/// `(childJoinValue, parentPrimaryKey)` pairing using the whole parent
/// [`Row`] in place of just its primary key — legal since two distinct
/// parent rows can never compare equal (their primary-key columns always
/// differ), so `Row` identity is at least as discriminating, and the join
/// has no other reason to know the parent's declared primary key.
#[derive(Debug)]
pub struct JoinNode {
    parent: NodeId,
    parent_key: String,
    child: NodeId,
    child_key: String,
    relationship_name: String,
    hidden: bool,
    pub(crate) output: Option<NodeId>,
    scratch: HashSet<(Value, Row)>,
}

impl JoinNode {
    pub fn new(
        parent: NodeId,
        parent_key: String,
        child: NodeId,
        child_key: String,
        relationship_name: String,
        hidden: bool,
    ) -> Self {
        JoinNode {
            parent,
            parent_key,
            child,
            child_key,
            relationship_name,
            hidden,
            output: None,
            scratch: HashSet::new(),
        }
    }

    /// Whether this relationship is meant to be stripped before reaching
    /// a consumer. Informational only here — a caller that wants the
    /// relationship hidden from the final materialization wires an
    /// explicit [`crate::ops::project::ProjectNode`] somewhere downstream
    /// of whatever still needs to see it; the join itself always embeds
    /// the relationship it computes.
    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }

    fn parent_key_value(&self, row: &Row) -> Value {
        row.get(&self.parent_key).cloned().unwrap_or(Value::Null)
    }

    fn child_key_value(&self, row: &Row) -> Value {
        row.get(&self.child_key).cloned().unwrap_or(Value::Null)
    }

    /// Consults the child source's hash index on `child_key` instead of
    /// scanning (spec §4.2's fast side), via [`Pipeline::fetch_equals`].
    fn fetch_children(&self, pipeline: &Pipeline, value: &Value) -> IvmResult<Vec<Node>> {
        Ok(pipeline
            .fetch_equals(self.child, &self.child_key, value)?
            .drain_all())
    }

    fn cleanup_children(&self, pipeline: &Pipeline, value: &Value) -> IvmResult<Vec<Node>> {
        Ok(pipeline
            .cleanup_equals(self.child, &self.child_key, value)?
            .drain_all())
    }

    /// Consults the parent source's hash index on `parent_key` instead of
    /// scanning (spec §4.2's fast side), via [`Pipeline::fetch_equals`].
    fn fetch_parents(&self, pipeline: &Pipeline, value: &Value) -> IvmResult<Vec<Node>> {
        Ok(pipeline
            .fetch_equals(self.parent, &self.parent_key, value)?
            .drain_all())
    }

    pub fn fetch(&mut self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let parents = pipeline.fetch(self.parent, constraints)?.drain_all();
        let mut result = Vec::with_capacity(parents.len());
        for mut parent in parents {
            let value = self.parent_key_value(&parent.row);
            let children = self.fetch_children(pipeline, &value)?;
            self.scratch.insert((value, parent.row.clone()));
            parent
                .relationships
                .insert(self.relationship_name.clone(), children);
            result.push(parent);
        }
        Ok(LazyNodes::new(result))
    }

    pub fn cleanup(&mut self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let parents = pipeline.cleanup(self.parent, constraints)?.drain_all();
        let mut result = Vec::with_capacity(parents.len());
        for mut parent in parents {
            let value = self.parent_key_value(&parent.row);
            let children = self.cleanup_children(pipeline, &value)?;
            self.scratch.remove(&(value, parent.row.clone()));
            parent
                .relationships
                .insert(self.relationship_name.clone(), children);
            result.push(parent);
        }
        Ok(LazyNodes::new(result))
    }

    fn handle_parent_add(
        &mut self,
        pipeline: &Pipeline,
        self_id: NodeId,
        mut node: Node,
    ) -> IvmResult<()> {
        let value = self.parent_key_value(&node.row);
        let children = self.fetch_children(pipeline, &value)?;
        self.scratch.insert((value, node.row.clone()));
        node.relationships
            .insert(self.relationship_name.clone(), children);
        if let Some(output) = self.output {
            pipeline.push(output, self_id, Change::Add(node))?;
        }
        Ok(())
    }

    fn handle_parent_remove(
        &mut self,
        pipeline: &Pipeline,
        self_id: NodeId,
        mut node: Node,
    ) -> IvmResult<()> {
        let value = self.parent_key_value(&node.row);
        let children = self.cleanup_children(pipeline, &value)?;
        self.scratch.remove(&(value, node.row.clone()));
        node.relationships
            .insert(self.relationship_name.clone(), children);
        if let Some(output) = self.output {
            pipeline.push(output, self_id, Change::Remove(node))?;
        }
        Ok(())
    }

    fn push_from_parent(
        &mut self,
        pipeline: &Pipeline,
        self_id: NodeId,
        change: Change,
    ) -> IvmResult<()> {
        match change {
            Change::Add(node) => self.handle_parent_add(pipeline, self_id, node),
            Change::Remove(node) => self.handle_parent_remove(pipeline, self_id, node),
            Change::Edit { old_row, row } => {
                if old_row.get(&self.parent_key) == row.get(&self.parent_key) {
                    if let Some(output) = self.output {
                        pipeline.push(output, self_id, Change::Edit { old_row, row })?;
                    }
                    Ok(())
                } else {
                    self.handle_parent_remove(pipeline, self_id, Node::new(old_row))?;
                    self.handle_parent_add(pipeline, self_id, Node::new(row))
                }
            }
            // A Child envelope arriving on the parent side already names
            // its own ancestor row; it has nothing to do with this join's
            // relationship and passes straight through unwrapped.
            pass_through @ Change::Child { .. } => {
                if let Some(output) = self.output {
                    pipeline.push(output, self_id, pass_through)?;
                }
                Ok(())
            }
        }
    }

    fn push_from_child(
        &mut self,
        pipeline: &Pipeline,
        self_id: NodeId,
        change: Change,
    ) -> IvmResult<()> {
        let Some(output) = self.output else {
            return Ok(());
        };
        match change {
            Change::Add(node) => {
                let value = self.child_key_value(&node.row);
                for parent in self.fetch_parents(pipeline, &value)? {
                    pipeline.push(
                        output,
                        self_id,
                        Change::child(
                            parent.row,
                            self.relationship_name.clone(),
                            Change::Add(node.clone()),
                        ),
                    )?;
                }
                Ok(())
            }
            Change::Remove(node) => {
                let value = self.child_key_value(&node.row);
                for parent in self.fetch_parents(pipeline, &value)? {
                    pipeline.push(
                        output,
                        self_id,
                        Change::child(
                            parent.row,
                            self.relationship_name.clone(),
                            Change::Remove(node.clone()),
                        ),
                    )?;
                }
                Ok(())
            }
            Change::Edit { old_row, row } => {
                let old_value = self.child_key_value(&old_row);
                let new_value = self.child_key_value(&row);
                if old_value == new_value {
                    for parent in self.fetch_parents(pipeline, &old_value)? {
                        pipeline.push(
                            output,
                            self_id,
                            Change::child(
                                parent.row,
                                self.relationship_name.clone(),
                                Change::Edit {
                                    old_row: old_row.clone(),
                                    row: row.clone(),
                                },
                            ),
                        )?;
                    }
                } else {
                    for parent in self.fetch_parents(pipeline, &old_value)? {
                        pipeline.push(
                            output,
                            self_id,
                            Change::child(
                                parent.row,
                                self.relationship_name.clone(),
                                Change::Remove(Node::new(old_row.clone())),
                            ),
                        )?;
                    }
                    for parent in self.fetch_parents(pipeline, &new_value)? {
                        pipeline.push(
                            output,
                            self_id,
                            Change::child(
                                parent.row,
                                self.relationship_name.clone(),
                                Change::Add(Node::new(row.clone())),
                            ),
                        )?;
                    }
                }
                Ok(())
            }
            Change::Child {
                row,
                relationship,
                change,
            } => {
                let value = self.child_key_value(&row);
                for parent in self.fetch_parents(pipeline, &value)? {
                    pipeline.push(
                        output,
                        self_id,
                        Change::child(
                            parent.row,
                            self.relationship_name.clone(),
                            Change::Child {
                                row: row.clone(),
                                relationship: relationship.clone(),
                                change: change.clone(),
                            },
                        ),
                    )?;
                }
                Ok(())
            }
        }
    }

    pub fn push(
        &mut self,
        pipeline: &Pipeline,
        self_id: NodeId,
        from: NodeId,
        change: Change,
    ) -> IvmResult<()> {
        if from == self.parent {
            self.push_from_parent(pipeline, self_id, change)
        } else if from == self.child {
            self.push_from_child(pipeline, self_id, change)
        } else {
            Err(internal_err!(
                "push on Join arrived from neither its parent nor its child"
            ))
        }
    }
}
