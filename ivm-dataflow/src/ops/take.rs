use ivm_data::{Constraint, Ordering};
use ivm_errors::IvmResult;

use crate::change::{Change, Node};
use crate::lazy::LazyNodes;
use crate::pipeline::{NodeId, Pipeline};

/// Maintains the first `limit` rows of the upstream ordering (spec §4.5).
///
/// Keeps no persistent window of its own. By the time a `push` reaches
/// this node the upstream source has already applied the underlying
/// change (spec §3's fetch/push consistency invariant), so a fresh
/// `fetch(&[])` of the upstream always reflects the *post*-change state;
/// comparing the changed row's position in that fresh list against
/// `limit` is enough to decide what crossed the boundary, with no
/// separate scratch to keep in sync.
#[derive(Debug)]
pub struct TakeNode {
    upstream: NodeId,
    ordering: Ordering,
    limit: usize,
    pub(crate) output: Option<NodeId>,
}

impl TakeNode {
    pub fn new(upstream: NodeId, ordering: Ordering, limit: usize) -> Self {
        TakeNode {
            upstream,
            ordering,
            limit,
            output: None,
        }
    }

    fn handle_add(&mut self, pipeline: &Pipeline, self_id: NodeId, node: Node) -> IvmResult<()> {
        let Some(output) = self.output else {
            return Ok(());
        };
        // Upstream already contains `node`; find where it landed.
        let after = pipeline.fetch(self.upstream, &[])?.drain_all();
        let Some(index) = after.iter().position(|n| n.row == node.row) else {
            return Ok(());
        };
        if index >= self.limit {
            return Ok(());
        }
        pipeline.push(output, self_id, Change::Add(node))?;
        if after.len() > self.limit {
            let evicted = after[self.limit].clone();
            pipeline.push(output, self_id, Change::Remove(evicted))?;
        }
        Ok(())
    }

    fn handle_remove(&mut self, pipeline: &Pipeline, self_id: NodeId, node: Node) -> IvmResult<()> {
        let Some(output) = self.output else {
            return Ok(());
        };
        // Upstream no longer contains `node`; recover its old position by
        // finding where it would sort among what remains.
        let after = pipeline.fetch(self.upstream, &[])?.drain_all();
        let key = self.ordering.sort_key(&node.row);
        let old_index = after.partition_point(|n| self.ordering.sort_key(&n.row) < key);
        if old_index >= self.limit {
            return Ok(());
        }
        pipeline.push(output, self_id, Change::Remove(node))?;
        let old_window_size = self.limit.min(after.len() + 1);
        let backfill_index = old_window_size - 1;
        if backfill_index < after.len() {
            pipeline.push(output, self_id, Change::Add(after[backfill_index].clone()))?;
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
                        if index < self.limit {
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
            .take(self.limit)
            .collect::<Vec<_>>();
        Ok(LazyNodes::new(nodes))
    }

    pub fn cleanup(&mut self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let nodes = pipeline
            .cleanup(self.upstream, constraints)?
            .take(self.limit)
            .collect::<Vec<_>>();
        Ok(LazyNodes::new(nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_window_size_computation_excludes_out_of_range_backfill() {
        // A window of limit 2 with only 1 row left after removal has no
        // backfill candidate.
        let limit = 2usize;
        let after_len = 1usize;
        let old_window_size = limit.min(after_len + 1);
        assert_eq!(old_window_size, 2);
        assert!(old_window_size - 1 >= after_len);
    }
}
