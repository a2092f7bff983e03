use ivm_data::Constraint;
use ivm_errors::IvmResult;

use crate::change::{Change, Node};
use crate::lazy::LazyNodes;
use crate::pipeline::{NodeId, Pipeline};

/// Strips the named relationships from every node it forwards (spec
/// §4.5's "nested projection / relationship hiding"): a hidden join feeds
/// another operator that needs the relationship to do its own work (a
/// filter keyed on a child's existence, say) but must not expose it in
/// the materialized output. `Project` is that boundary.
#[derive(Debug)]
pub struct ProjectNode {
    upstream: NodeId,
    hide: Vec<String>,
    pub(crate) output: Option<NodeId>,
}

impl ProjectNode {
    pub fn new(upstream: NodeId, hide: Vec<String>) -> Self {
        ProjectNode {
            upstream,
            hide,
            output: None,
        }
    }

    fn strip(&self, mut node: Node) -> Node {
        for name in &self.hide {
            node.relationships.remove(name);
        }
        node
    }

    pub fn push(&mut self, pipeline: &Pipeline, self_id: NodeId, change: Change) -> IvmResult<()> {
        let Some(output) = self.output else {
            return Ok(());
        };
        let forwarded = match change {
            Change::Add(node) => Some(Change::Add(self.strip(node))),
            Change::Remove(node) => Some(Change::Remove(self.strip(node))),
            edit @ Change::Edit { .. } => Some(edit),
            Change::Child { row, relationship, change } => {
                if self.hide.contains(&relationship) {
                    None
                } else {
                    Some(Change::Child { row, relationship, change })
                }
            }
        };
        if let Some(change) = forwarded {
            pipeline.push(output, self_id, change)?;
        }
        Ok(())
    }

    pub fn fetch(&self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let nodes = pipeline
            .fetch(self.upstream, constraints)?
            .map(|n| self.strip(n))
            .collect::<Vec<_>>();
        Ok(LazyNodes::new(nodes))
    }

    pub fn cleanup(&mut self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let nodes = pipeline
            .cleanup(self.upstream, constraints)?
            .map(|n| self.strip(n))
            .collect::<Vec<_>>();
        Ok(LazyNodes::new(nodes))
    }
}
