use ivm_data::{Constraint, Ordering};
use ivm_errors::IvmResult;

use crate::change::{Change, Node};
use crate::lazy::LazyNodes;
use crate::pipeline::{NodeId, Pipeline};

/// Drops the first `offset` rows of the upstream ordering, forwarding
/// everything from position `offset` onward.
///
/// The mirror image of [`super::take::TakeNode`]: `Take` has a fixed
/// upper bound and refills from below when something in-window leaves;
/// `Skip` has no upper bound and only tracks the single lower boundary,
/// computed the same stateless way — from a fresh post-change fetch of
/// the upstream, never from scratch of its own.
#[derive(Debug)]
pub struct SkipNode {
    upstream: NodeId,
    ordering: Ordering,
    offset: usize,
    pub(crate) output: Option<NodeId>,
}

impl SkipNode {
    pub fn new(upstream: NodeId, ordering: Ordering, offset: usize) -> Self {
        SkipNode {
            upstream,
            ordering,
            offset,
            output: None,
        }
    }

    fn handle_add(&mut self, pipeline: &Pipeline, self_id: NodeId, node: Node) -> IvmResult<()> {
        let Some(output) = self.output else {
            return Ok(());
        };
        let after = pipeline.fetch(self.upstream, &[])?.drain_all();
        let Some(index) = after.iter().position(|n| n.row == node.row) else {
            return Ok(());
        };
        if index >= self.offset {
            pipeline.push(output, self_id, Change::Add(node))?;
        } else if self.offset < after.len() {
            // The row that used to occupy the last skipped slot has been
            // pushed into the visible range by this insertion.
            pipeline.push(output, self_id, Change::Add(after[self.offset].clone()))?;
        }
        Ok(())
    }

    fn handle_remove(&mut self, pipeline: &Pipeline, self_id: NodeId, node: Node) -> IvmResult<()> {
        let Some(output) = self.output else {
            return Ok(());
        };
        let after = pipeline.fetch(self.upstream, &[])?.drain_all();
        let key = self.ordering.sort_key(&node.row);
        let old_index = after.partition_point(|n| self.ordering.sort_key(&n.row) < key);
        if old_index >= self.offset {
            pipeline.push(output, self_id, Change::Remove(node))?;
        } else if self.offset > 0 && self.offset - 1 < after.len() {
            // The first previously-visible row has been pulled back into
            // the skipped prefix by this removal.
            pipeline.push(output, self_id, Change::Remove(after[self.offset - 1].clone()))?;
        }
        Ok(())
    }

    pub fn push(&mut self, pipeline: &Pipeline, self_id: NodeId, change: Change) -> IvmResult<()> {
        match change {
            Change::Add(node) => self.handle_add(pipeline, self_id, node),
            Change::Remove(node) => self.handle_remove(pipeline, self_id, node),
            Change::Edit { old_row, row } => {
                let unchanged = self.ordering.sort_key(&old_row) == self.ordering.sort_key(&row);
                if unchanged {
                    let after = pipeline.fetch(self.upstream, &[])?.drain_all();
                    let index = after.iter().position(|n| n.row == row);
                    if let (Some(output), Some(index)) = (self.output, index) {
                        if index >= self.offset {
                            pipeline.push(output, self_id, Change::Edit { old_row, row })?;
                        }
                    }
                    Ok(())
                } else {
                    self.handle_remove(pipeline, self_id, Node::new(old_row))?;
                    self.handle_add(pipeline, self_id, Node::new(row))
                }
            }
            child @ Change::Child { .. } => {
                if let Some(output) = self.output {
                    pipeline.push(output, self_id, child)?;
                }
                Ok(())
            }
        }
    }

    pub fn fetch(&self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let nodes = pipeline
            .fetch(self.upstream, constraints)?
            .skip(self.offset)
            .collect::<Vec<_>>();
        Ok(LazyNodes::new(nodes))
    }

    pub fn cleanup(&mut self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let nodes = pipeline
            .cleanup(self.upstream, constraints)?
            .skip(self.offset)
            .collect::<Vec<_>>();
        Ok(LazyNodes::new(nodes))
    }
}
