//! The six concrete scenarios and the quantified invariants they draw
//! from, exercised end to end through a [`Pipeline`] with a [`SnitchNode`]
//! tapping the final operator's output.

use std::collections::BTreeMap;

use ivm_dataflow::pipeline::{NodeId, Pipeline};
use ivm_dataflow::source::{ColumnSpec, ColumnType, SourceSchema};
use ivm_dataflow::view::ViewSchema;
use ivm_dataflow::{Change, Node, SourceChange};
use ivm_data::{Constraint, OrderColumn, Ordering, PrimaryKey, Row, Value};
use test_strategy::proptest;

fn issue_schema() -> SourceSchema {
    let mut columns = BTreeMap::new();
    columns.insert("id".to_string(), ColumnSpec::new(ColumnType::Text, false));
    SourceSchema::new("issues", columns, PrimaryKey::new(vec!["id".into()]).unwrap()).unwrap()
}

fn comment_schema() -> SourceSchema {
    let mut columns = BTreeMap::new();
    columns.insert("id".to_string(), ColumnSpec::new(ColumnType::Text, false));
    columns.insert("issueID".to_string(), ColumnSpec::new(ColumnType::Text, false));
    SourceSchema::new(
        "comments",
        columns,
        PrimaryKey::new(vec!["id".into()]).unwrap(),
    )
    .unwrap()
}

fn revision_schema() -> SourceSchema {
    let mut columns = BTreeMap::new();
    columns.insert("id".to_string(), ColumnSpec::new(ColumnType::Text, false));
    columns.insert("commentID".to_string(), ColumnSpec::new(ColumnType::Text, false));
    SourceSchema::new(
        "revisions",
        columns,
        PrimaryKey::new(vec!["id".into()]).unwrap(),
    )
    .unwrap()
}

fn issue_row(id: &str) -> Row {
    Row::new([("id".to_string(), Value::from(id))])
}

fn comment_row(id: &str, issue_id: &str) -> Row {
    Row::new([
        ("id".to_string(), Value::from(id)),
        ("issueID".to_string(), Value::from(issue_id)),
    ])
}

fn revision_row(id: &str, comment_id: &str) -> Row {
    Row::new([
        ("id".to_string(), Value::from(id)),
        ("commentID".to_string(), Value::from(comment_id)),
    ])
}

fn by_id() -> Ordering {
    Ordering::new(vec![OrderColumn::asc("id")])
}

/// Wires `issues` joined to `comments` (parentKey `id`, childKey
/// `issueID`, relationship `"comments"`), tapped by a snitch, returning
/// the pipeline plus the node ids a test needs to drive it.
struct IssuesWithComments {
    pipeline: Pipeline,
    issues: NodeId,
    comments: NodeId,
    join: NodeId,
    snitch: NodeId,
}

fn issues_with_comments() -> IssuesWithComments {
    let mut pipeline = Pipeline::new();
    let issues = pipeline.add_source(issue_schema());
    let comments = pipeline.add_source(comment_schema());
    let issues_conn = pipeline.connect(
        issues,
        by_id().canonicalize(&issue_schema().primary_key),
        vec![],
    );
    let comments_conn = pipeline.connect(
        comments,
        by_id().canonicalize(&comment_schema().primary_key),
        vec![],
    );
    let join = pipeline.add_join(issues_conn, "id", comments_conn, "issueID", "comments", false);
    let snitch = pipeline.add_snitch(join);
    IssuesWithComments {
        pipeline,
        issues,
        comments,
        join,
        snitch,
    }
}

#[test]
fn scenario_1_child_add_nests_under_named_parent() {
    let mut s = issues_with_comments();
    s.pipeline
        .push_source_change(s.issues, SourceChange::Add(issue_row("i1")))
        .unwrap();
    s.pipeline.snitch_mut(s.snitch).drain();

    s.pipeline
        .push_source_change(s.comments, SourceChange::Add(comment_row("c1", "i1")))
        .unwrap();
    let recorded = s.pipeline.snitch_mut(s.snitch).drain();

    assert_eq!(recorded.len(), 1);
    let expected = Change::child(
        issue_row("i1"),
        "comments",
        Change::Add(Node::new(comment_row("c1", "i1"))),
    );
    assert_eq!(recorded[0], expected);
}

#[test]
fn scenario_2_parent_remove_cascades_scratch_cleanup() {
    let mut s = issues_with_comments();
    s.pipeline
        .push_source_change(s.issues, SourceChange::Add(issue_row("i1")))
        .unwrap();
    s.pipeline
        .push_source_change(s.comments, SourceChange::Add(comment_row("c1", "i1")))
        .unwrap();
    s.pipeline.snitch_mut(s.snitch).drain();

    s.pipeline
        .push_source_change(s.issues, SourceChange::Remove(issue_row("i1")))
        .unwrap();
    let recorded = s.pipeline.snitch_mut(s.snitch).drain();

    assert_eq!(recorded.len(), 1);
    let expected = Change::Remove(
        Node::new(issue_row("i1")).with_relationship(
            "comments",
            vec![Node::new(comment_row("c1", "i1"))],
        ),
    );
    assert_eq!(recorded[0], expected);
    assert_eq!(s.pipeline.join(s.join).scratch_len(), 0);
}

#[test]
fn scenario_3_child_reparenting_edit_emits_remove_then_add() {
    let mut s = issues_with_comments();
    s.pipeline
        .push_source_change(s.issues, SourceChange::Add(issue_row("i1")))
        .unwrap();
    s.pipeline
        .push_source_change(s.issues, SourceChange::Add(issue_row("i2")))
        .unwrap();
    s.pipeline
        .push_source_change(s.comments, SourceChange::Add(comment_row("c1", "i1")))
        .unwrap();
    s.pipeline.snitch_mut(s.snitch).drain();

    s.pipeline
        .push_source_change(
            s.comments,
            SourceChange::Edit {
                old_row: comment_row("c1", "i1"),
                row: comment_row("c1", "i2"),
            },
        )
        .unwrap();
    let recorded = s.pipeline.snitch_mut(s.snitch).drain();

    assert_eq!(recorded.len(), 2);
    assert_eq!(
        recorded[0],
        Change::child(
            issue_row("i1"),
            "comments",
            Change::Remove(Node::new(comment_row("c1", "i1"))),
        )
    );
    assert_eq!(
        recorded[1],
        Change::child(
            issue_row("i2"),
            "comments",
            Change::Add(Node::new(comment_row("c1", "i2"))),
        )
    );
}

#[test]
fn scenario_4_nested_join_composes_two_levels_of_child() {
    let mut pipeline = Pipeline::new();
    let issues = pipeline.add_source(issue_schema());
    let comments = pipeline.add_source(comment_schema());
    let revisions = pipeline.add_source(revision_schema());
    let issues_conn = pipeline.connect(
        issues,
        by_id().canonicalize(&issue_schema().primary_key),
        vec![],
    );
    let comments_conn = pipeline.connect(
        comments,
        by_id().canonicalize(&comment_schema().primary_key),
        vec![],
    );
    let revisions_conn = pipeline.connect(
        revisions,
        by_id().canonicalize(&revision_schema().primary_key),
        vec![],
    );
    let inner_join = pipeline.add_join(
        comments_conn,
        "id",
        revisions_conn,
        "commentID",
        "revisions",
        false,
    );
    let outer_join = pipeline.add_join(issues_conn, "id", inner_join, "issueID", "comments", false);
    let snitch = pipeline.add_snitch(outer_join);

    pipeline
        .push_source_change(issues, SourceChange::Add(issue_row("i1")))
        .unwrap();
    pipeline
        .push_source_change(comments, SourceChange::Add(comment_row("c1", "i1")))
        .unwrap();
    pipeline.snitch_mut(snitch).drain();

    pipeline
        .push_source_change(revisions, SourceChange::Add(revision_row("r1", "c1")))
        .unwrap();
    let recorded = pipeline.snitch_mut(snitch).drain();

    assert_eq!(recorded.len(), 1);
    let expected = Change::child(
        issue_row("i1"),
        "comments",
        Change::child(
            comment_row("c1", "i1"),
            "revisions",
            Change::Add(Node::new(revision_row("r1", "c1"))),
        ),
    );
    assert_eq!(recorded[0], expected);
}

#[test]
fn scenario_5_take_two_evicts_on_lower_sorting_insert() {
    let mut pipeline = Pipeline::new();
    let issues = pipeline.add_source(issue_schema());
    let ordering = by_id().canonicalize(&issue_schema().primary_key);
    let conn = pipeline.connect(issues, ordering.clone(), vec![]);
    let take = pipeline.add_take(conn, ordering, 2);
    let snitch = pipeline.add_snitch(take);

    pipeline
        .push_source_change(issues, SourceChange::Add(issue_row("r1")))
        .unwrap();
    pipeline
        .push_source_change(issues, SourceChange::Add(issue_row("r2")))
        .unwrap();
    pipeline.snitch_mut(snitch).drain();

    pipeline
        .push_source_change(issues, SourceChange::Add(issue_row("r0")))
        .unwrap();
    let recorded = pipeline.snitch_mut(snitch).drain();

    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0], Change::Add(Node::new(issue_row("r0"))));
    assert_eq!(recorded[1], Change::Remove(Node::new(issue_row("r2"))));
}

#[test]
fn scenario_6_filter_edit_crossing_predicate_emits_remove() {
    use ivm_dataflow::{CompareOp, Predicate};

    let mut columns = BTreeMap::new();
    columns.insert("id".to_string(), ColumnSpec::new(ColumnType::Number, false));
    columns.insert("status".to_string(), ColumnSpec::new(ColumnType::Text, false));
    let schema = SourceSchema::new(
        "tickets",
        columns,
        PrimaryKey::new(vec!["id".into()]).unwrap(),
    )
    .unwrap();

    let row = |id: i64, status: &str| {
        Row::new([
            ("id".to_string(), Value::from(id)),
            ("status".to_string(), Value::from(status)),
        ])
    };

    let mut pipeline = Pipeline::new();
    let source = pipeline.add_source(schema.clone());
    let ordering = Ordering::new(vec![OrderColumn::asc("id")]).canonicalize(&schema.primary_key);
    let conn = pipeline.connect(source, ordering, vec![]);
    let filter = pipeline.add_filter(conn, Predicate::eq("status", "open"));
    let snitch = pipeline.add_snitch(filter);

    pipeline
        .push_source_change(source, SourceChange::Add(row(1, "open")))
        .unwrap();
    pipeline.snitch_mut(snitch).drain();

    pipeline
        .push_source_change(
            source,
            SourceChange::Edit {
                old_row: row(1, "open"),
                row: row(1, "closed"),
            },
        )
        .unwrap();
    let recorded = pipeline.snitch_mut(snitch).drain();

    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], Change::Remove(Node::new(row(1, "open"))));

    // sanity: CompareOp is reachable from the same module for predicates
    // that need it instead of equality.
    let _ = Predicate::compare("id", CompareOp::Ge, 1_i64);
}

#[proptest]
fn fetch_yields_strict_ascending_order_with_no_duplicates(ids: Vec<i64>) {
    let mut pipeline = Pipeline::new();
    let mut columns = BTreeMap::new();
    columns.insert("id".to_string(), ColumnSpec::new(ColumnType::Number, false));
    let schema = SourceSchema::new(
        "nums",
        columns,
        PrimaryKey::new(vec!["id".into()]).unwrap(),
    )
    .unwrap();
    let source = pipeline.add_source(schema.clone());
    let ordering = Ordering::new(vec![OrderColumn::asc("id")]).canonicalize(&schema.primary_key);
    let conn = pipeline.connect(source, ordering, vec![]);

    let mut seen = std::collections::HashSet::new();
    for id in ids {
        if seen.insert(id) {
            pipeline
                .push_source_change(
                    source,
                    SourceChange::Add(Row::new([("id".to_string(), Value::from(id))])),
                )
                .unwrap();
        }
    }

    let fetched = pipeline.fetch(conn, &[]).unwrap().drain_all();
    let mut prev: Option<&Value> = None;
    for node in &fetched {
        let v = node.row.get("id").unwrap();
        if let Some(p) = prev {
            assert!(p < v);
        }
        prev = Some(v);
    }
}

#[test]
fn commutativity_on_disjoint_keys_is_order_independent() {
    let build = |first: &str, second: &str| {
        let mut pipeline = Pipeline::new();
        let source = pipeline.add_source(issue_schema());
        let ordering = by_id().canonicalize(&issue_schema().primary_key);
        let conn = pipeline.connect(source, ordering, vec![]);
        pipeline
            .push_source_change(source, SourceChange::Add(issue_row(first)))
            .unwrap();
        pipeline
            .push_source_change(source, SourceChange::Add(issue_row(second)))
            .unwrap();
        pipeline.fetch(conn, &[]).unwrap().drain_all()
    };

    let a = build("i1", "i2");
    let b = build("i2", "i1");
    assert_eq!(a, b);
}

#[test]
fn replay_round_trip_restores_scratch_and_view() {
    use ivm_dataflow::{Catch, Replay};

    let mut pipeline = Pipeline::new();
    let source = pipeline.add_source(issue_schema());
    let ordering = by_id().canonicalize(&issue_schema().primary_key);
    let mut catch = Catch::new(
        pipeline,
        source,
        |p, src| p.connect(src, ordering.clone(), vec![]),
        ViewSchema::new(ordering, false),
    );

    let changes = vec![
        SourceChange::Add(issue_row("i1")),
        SourceChange::Add(issue_row("i2")),
        SourceChange::Edit {
            old_row: issue_row("i2"),
            row: issue_row("i3"),
        },
    ];
    assert!(Replay::round_trip(&mut catch, &changes).unwrap());
    assert!(catch.view_data().is_empty());
}

// Silence an unused-import warning when the `Constraint` re-export isn't
// otherwise exercised by a given test configuration.
#[allow(dead_code)]
fn _uses_constraint(c: Constraint, r: &Row) -> bool {
    c.matches(r)
}
