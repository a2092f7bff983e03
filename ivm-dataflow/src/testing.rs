//! Test harness (spec §2's "Test harness" component), gated behind the
//! `testing` feature: a [`SnitchNode`] records every [`Change`] it sees
//! on its way through the pipeline, [`Catch`] wires a source through a
//! chain of operators to a snitch and a view, and [`Replay`] checks the
//! round-trip invariant a [`SourceChange`] and its structural inverse are
//! supposed to satisfy.

use ivm_data::Constraint;
use ivm_errors::IvmResult;

use crate::change::{Change, SourceChange};
use crate::lazy::LazyNodes;
use crate::pipeline::{NodeId, Pipeline};

/// An inline pass-through node that records every [`Change`] it receives
/// before forwarding it unchanged, the way an in-memory test sink captures
/// a pipeline's output for assertion without altering it.
#[derive(Debug)]
pub struct SnitchNode {
    upstream: NodeId,
    changes: Vec<Change>,
    pub(crate) output: Option<NodeId>,
}

impl SnitchNode {
    pub fn new(upstream: NodeId) -> Self {
        SnitchNode {
            upstream,
            changes: Vec::new(),
            output: None,
        }
    }

    pub fn push(&mut self, pipeline: &Pipeline, self_id: NodeId, change: Change) -> IvmResult<()> {
        self.changes.push(change.clone());
        if let Some(output) = self.output {
            pipeline.push(output, self_id, change)?;
        }
        Ok(())
    }

    pub fn fetch(&self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        pipeline.fetch(self.upstream, constraints)
    }

    pub fn cleanup(&mut self, pipeline: &Pipeline, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        pipeline.cleanup(self.upstream, constraints)
    }

    /// Every change seen so far, in arrival order.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Take every recorded change, leaving the snitch empty for the next
    /// round of assertions.
    pub fn drain(&mut self) -> Vec<Change> {
        std::mem::take(&mut self.changes)
    }
}

/// Wires a source through a chain of operators (built by the caller's
/// closure) to both a snitch and a view, and drains both after every push
/// so a test can assert on the emitted diff stream and the resulting
/// materialization from a single call.
pub struct Catch {
    pub pipeline: Pipeline,
    pub source: NodeId,
    pub snitch: NodeId,
    pub view: NodeId,
}

impl Catch {
    /// `build` receives the pipeline and the source's `NodeId` and must
    /// return the `NodeId` of the operator chain's final output — the
    /// node that the snitch and view are attached downstream of.
    pub fn new(
        mut pipeline: Pipeline,
        source: NodeId,
        build: impl FnOnce(&mut Pipeline, NodeId) -> NodeId,
        view_schema: crate::view::ViewSchema,
    ) -> Self {
        let tail = build(&mut pipeline, source);
        let snitch = pipeline.add_snitch(tail);
        let view = pipeline.add_view(snitch, view_schema);
        Catch {
            pipeline,
            source,
            snitch,
            view,
        }
    }

    /// Push one source-level change through the pipeline, then drain and
    /// return everything the snitch recorded as a result, flushing the
    /// view so its listeners (if any) observe the new snapshot too.
    pub fn push(&mut self, change: SourceChange) -> IvmResult<Vec<Change>> {
        self.pipeline.push_source_change(self.source, change)?;
        self.pipeline.view_mut(self.view).flush();
        Ok(self.pipeline.snitch_mut(self.snitch).drain())
    }

    pub fn view_data(&self) -> Vec<crate::change::Node> {
        self.pipeline.view(self.view).data().to_vec()
    }
}

/// Checks the round-trip invariant: applying a sequence of
/// [`SourceChange`]s, then its structural inverse in reverse order, must
/// leave the view's materialized data exactly as it started.
pub struct Replay;

impl Replay {
    /// The structural inverse of one `SourceChange`: `Add` undoes with
    /// `Remove` of the same row, `Remove` undoes with `Add` of the same
    /// row, and `Edit` undoes with `Edit` of its rows swapped.
    pub fn invert(change: &SourceChange) -> SourceChange {
        match change {
            SourceChange::Add(row) => SourceChange::Remove(row.clone()),
            SourceChange::Remove(row) => SourceChange::Add(row.clone()),
            SourceChange::Edit { old_row, row } => SourceChange::Edit {
                old_row: row.clone(),
                row: old_row.clone(),
            },
        }
    }

    /// Apply `changes` in order, then their inverses in reverse order,
    /// asserting that `catch`'s view returns to its starting snapshot.
    pub fn round_trip(catch: &mut Catch, changes: &[SourceChange]) -> IvmResult<bool> {
        let before = catch.view_data();
        for change in changes {
            catch.push(change.clone())?;
        }
        for change in changes.iter().rev() {
            catch.push(Replay::invert(change))?;
        }
        let after = catch.view_data();
        Ok(before == after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ivm_data::{OrderColumn, Ordering, PrimaryKey, Row, Value};
    use crate::source::{ColumnSpec, ColumnType, SourceSchema};
    use crate::view::ViewSchema;
    use std::collections::BTreeMap;

    fn issues_schema() -> SourceSchema {
        let mut columns = BTreeMap::new();
        columns.insert("id".to_string(), ColumnSpec::new(ColumnType::Text, false));
        columns.insert("title".to_string(), ColumnSpec::new(ColumnType::Text, false));
        SourceSchema::new("issues", columns, PrimaryKey::new(vec!["id".into()]).unwrap()).unwrap()
    }

    fn row(id: &str, title: &str) -> Row {
        Row::new([
            ("id".to_string(), Value::from(id)),
            ("title".to_string(), Value::from(title)),
        ])
    }

    #[test]
    fn snitch_records_add_and_view_materializes_it() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(issues_schema());
        let ordering = Ordering::new(vec![OrderColumn::asc("id")])
            .canonicalize(&issues_schema().primary_key);
        let mut catch = Catch::new(
            pipeline,
            source,
            |p, src| p.connect(src, ordering.clone(), vec![]),
            ViewSchema::new(ordering, false),
        );
        let recorded = catch.push(SourceChange::Add(row("i1", "first"))).unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(matches!(recorded[0], Change::Add(_)));
        assert_eq!(catch.view_data().len(), 1);
    }

    #[test]
    fn replay_round_trip_restores_view() {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(issues_schema());
        let ordering = Ordering::new(vec![OrderColumn::asc("id")])
            .canonicalize(&issues_schema().primary_key);
        let mut catch = Catch::new(
            pipeline,
            source,
            |p, src| p.connect(src, ordering.clone(), vec![]),
            ViewSchema::new(ordering, false),
        );
        let changes = vec![
            SourceChange::Add(row("i1", "first")),
            SourceChange::Add(row("i2", "second")),
        ];
        let restored = Replay::round_trip(&mut catch, &changes).unwrap();
        assert!(restored);
        assert!(catch.view_data().is_empty());
    }
}
