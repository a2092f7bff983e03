use std::cell::RefCell;
use std::time::Instant;

use ivm_data::{Constraint, Ordering};
use ivm_errors::{internal_err, IvmResult};
use metrics::{counter, histogram};

use crate::change::{Change, SourceChange};
use crate::lazy::LazyNodes;
use crate::ops::filter::{FilterNode, Predicate};
use crate::ops::join::JoinNode;
use crate::ops::project::ProjectNode;
use crate::ops::skip::SkipNode;
use crate::ops::take::TakeNode;
use crate::source::{ConnectionNode, SourceNode, SourceSchema};
use crate::view::{ViewNode, ViewSchema};
#[cfg(feature = "testing")]
use crate::testing::SnitchNode;

/// An index into a [`Pipeline`]'s node arena. Every node refers to its
/// upstream(s) and downstream by `NodeId`, never by an owning pointer —
/// the arena is the sole owner of node storage (spec §9's "no cyclic
/// ownership").
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

/// The concrete state of one pipeline node. A single closed enum rather
/// than a trait object, matching spec §9's "no dynamic dispatch across
/// module boundaries beyond the `Input`/`Output` contracts" — the
/// `Input`/`Output` contracts themselves are these match arms in
/// [`Pipeline`], not a vtable.
#[derive(Debug)]
pub enum NodeKind {
    Source(SourceNode),
    Connection(ConnectionNode),
    Filter(FilterNode),
    Take(TakeNode),
    Skip(SkipNode),
    Join(JoinNode),
    Project(ProjectNode),
    View(ViewNode),
    #[cfg(feature = "testing")]
    Snitch(SnitchNode),
}

impl NodeKind {
    /// Label used on the `node_kind` metrics dimension and in trace spans,
    /// the way a dataflow engine's own ingredient-name label tags its
    /// per-node invocation-count and duration metrics.
    fn kind_name(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "source",
            NodeKind::Connection(_) => "connection",
            NodeKind::Filter(_) => "filter",
            NodeKind::Take(_) => "take",
            NodeKind::Skip(_) => "skip",
            NodeKind::Join(_) => "join",
            NodeKind::Project(_) => "project",
            NodeKind::View(_) => "view",
            #[cfg(feature = "testing")]
            NodeKind::Snitch(_) => "snitch",
        }
    }
}

/// The owner of every node in one query pipeline (spec §4.3's operator
/// framework, §9's anti-cyclic-ownership design note). Modeled on the
/// `petgraph::Graph<Node>` + `NodeIndex` pattern common to dataflow
/// engines: nodes are stored once, centrally, and referred to everywhere
/// else by index.
///
/// Construction (`add_*`/`connect`) takes `&mut self`. Once built, the
/// pipeline only ever needs `&self`: every node's own mutable state lives
/// behind its `RefCell`, so a cascade that touches many nodes during one
/// `push_source_change` never needs more than one node borrowed at a time
/// (the graph is acyclic, so no node is ever asked to lend itself out
/// twice in the same call stack).
#[derive(Debug, Default)]
pub struct Pipeline {
    nodes: Vec<RefCell<NodeKind>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Pipeline { nodes: Vec::new() }
    }

    fn push_node(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(RefCell::new(kind));
        NodeId(self.nodes.len() - 1)
    }

    fn set_output(&mut self, id: NodeId, output: NodeId) {
        let mut node = self.nodes[id.0].borrow_mut();
        match &mut *node {
            NodeKind::Connection(c) => c.set_output(output),
            NodeKind::Filter(f) => f.output = Some(output),
            NodeKind::Take(t) => t.output = Some(output),
            NodeKind::Skip(s) => s.output = Some(output),
            NodeKind::Join(j) => j.output = Some(output),
            NodeKind::Project(p) => p.output = Some(output),
            #[cfg(feature = "testing")]
            NodeKind::Snitch(s) => s.output = Some(output),
            NodeKind::Source(_) | NodeKind::View(_) => {
                unreachable!("sources fan out to connections; views are terminal")
            }
        }
    }

    // ---- construction ----------------------------------------------------

    pub fn add_source(&mut self, schema: SourceSchema) -> NodeId {
        self.push_node(NodeKind::Source(SourceNode::new(schema)))
    }

    pub fn connect(
        &mut self,
        source: NodeId,
        ordering: Ordering,
        optional_filters: Vec<Constraint>,
    ) -> NodeId {
        let id = self.push_node(NodeKind::Connection(ConnectionNode::new(
            source,
            ordering,
            optional_filters,
        )));
        let mut src = self.nodes[source.0].borrow_mut();
        match &mut *src {
            NodeKind::Source(s) => s.register_connection(id),
            _ => unreachable!("connect's `source` must name a Source node"),
        }
        id
    }

    pub fn add_filter(&mut self, upstream: NodeId, predicate: Predicate) -> NodeId {
        let id = self.push_node(NodeKind::Filter(FilterNode::new(upstream, predicate)));
        self.set_output(upstream, id);
        id
    }

    pub fn add_take(&mut self, upstream: NodeId, ordering: Ordering, limit: usize) -> NodeId {
        let id = self.push_node(NodeKind::Take(TakeNode::new(upstream, ordering, limit)));
        self.set_output(upstream, id);
        id
    }

    pub fn add_skip(&mut self, upstream: NodeId, ordering: Ordering, offset: usize) -> NodeId {
        let id = self.push_node(NodeKind::Skip(SkipNode::new(upstream, ordering, offset)));
        self.set_output(upstream, id);
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_join(
        &mut self,
        parent: NodeId,
        parent_key: impl Into<String>,
        child: NodeId,
        child_key: impl Into<String>,
        relationship_name: impl Into<String>,
        hidden: bool,
    ) -> NodeId {
        let id = self.push_node(NodeKind::Join(JoinNode::new(
            parent,
            parent_key.into(),
            child,
            child_key.into(),
            relationship_name.into(),
            hidden,
        )));
        self.set_output(parent, id);
        self.set_output(child, id);
        id
    }

    pub fn add_project(&mut self, upstream: NodeId, hide: Vec<String>) -> NodeId {
        let id = self.push_node(NodeKind::Project(ProjectNode::new(upstream, hide)));
        self.set_output(upstream, id);
        id
    }

    pub fn add_view(&mut self, upstream: NodeId, schema: ViewSchema) -> NodeId {
        let id = self.push_node(NodeKind::View(ViewNode::new(schema)));
        self.set_output(upstream, id);
        id
    }

    #[cfg(feature = "testing")]
    pub fn add_snitch(&mut self, upstream: NodeId) -> NodeId {
        let id = self.push_node(NodeKind::Snitch(SnitchNode::new(upstream)));
        self.set_output(upstream, id);
        id
    }

    // ---- operation ---------------------------------------------------------

    /// Apply one primitive change at a source, running the full cascade
    /// through every connection reachable from it to completion before
    /// returning (spec §5: no suspension points inside a push).
    pub fn push_source_change(&self, source: NodeId, change: SourceChange) -> IvmResult<()> {
        let start = Instant::now();
        let span = tracing::trace_span!("source_push", node = source.0);
        let _enter = span.enter();
        let (derived, connections) = {
            let mut node = self.nodes[source.0].borrow_mut();
            let src = match &mut *node {
                NodeKind::Source(s) => s,
                _ => return Err(internal_err!("push_source_change target is not a Source")),
            };
            let derived = src.apply(change)?;
            (derived, src.connections().to_vec())
        };
        for change in derived {
            for &conn in &connections {
                self.push(conn, source, change.clone())?;
            }
        }
        histogram!("ivm_node_push_duration_seconds", "node_kind" => "source")
            .record(start.elapsed().as_secs_f64());
        counter!("ivm_node_push_total", "node_kind" => "source").increment(1);
        Ok(())
    }

    /// Forward one already-derived `Change` into node `id`, arriving from
    /// upstream node `from`, letting it decide what (if anything) to emit
    /// further downstream. `from` only matters to [`crate::ops::join::JoinNode`],
    /// which has two upstreams and must know which side produced the
    /// change; every other node has exactly one upstream and ignores it.
    ///
    /// Every dispatch is timed and counted under `node_kind`, the same way
    /// a single wrapping point around each ingredient's input handler
    /// times and counts every invocation regardless of which concrete
    /// operator handled it.
    pub fn push(&self, id: NodeId, from: NodeId, change: Change) -> IvmResult<()> {
        let start = Instant::now();
        let mut node = self.nodes[id.0].borrow_mut();
        let kind_name = node.kind_name();
        let span = tracing::trace_span!("node_push", node = id.0, kind = kind_name);
        let _enter = span.enter();
        let result = match &mut *node {
            NodeKind::Source(_) => Err(internal_err!(
                "a Source node cannot receive a Change directly; use push_source_change"
            )),
            NodeKind::Connection(c) => {
                if let Some(admitted) = c.admit(&change) {
                    if let Some(output) = c.output {
                        drop(node);
                        self.push(output, id, admitted)
                    } else {
                        Ok(())
                    }
                } else {
                    Ok(())
                }
            }
            NodeKind::Filter(f) => f.push(self, id, change),
            NodeKind::Take(t) => t.push(self, id, change),
            NodeKind::Skip(s) => s.push(self, id, change),
            NodeKind::Join(j) => j.push(self, id, from, change),
            NodeKind::Project(p) => p.push(self, id, change),
            NodeKind::View(v) => v.apply(change),
            #[cfg(feature = "testing")]
            NodeKind::Snitch(s) => s.push(self, id, change),
        };
        histogram!("ivm_node_push_duration_seconds", "node_kind" => kind_name)
            .record(start.elapsed().as_secs_f64());
        counter!("ivm_node_push_total", "node_kind" => kind_name).increment(1);
        result
    }

    /// Pull matching [`Node`](crate::change::Node)s from node `id` (spec
    /// §4.3's `fetch`). `constraints` is conjunctive: a row must match
    /// every entry.
    pub fn fetch(&self, id: NodeId, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let mut node = self.nodes[id.0].borrow_mut();
        match &mut *node {
            NodeKind::Source(_) => Err(internal_err!(
                "fetch must target a Connection, not a Source directly"
            )),
            NodeKind::Connection(c) => {
                let (source, ordering) = (c.source, c.ordering.clone());
                let merged = merge_constraints(constraints, &c.optional_filters);
                drop(node);
                let mut src = self.nodes[source.0].borrow_mut();
                match &mut *src {
                    NodeKind::Source(s) => Ok(s.fetch(&ordering, &merged)),
                    _ => Err(internal_err!("Connection's source is not a Source node")),
                }
            }
            NodeKind::Filter(f) => f.fetch(self, constraints),
            NodeKind::Take(t) => t.fetch(self, constraints),
            NodeKind::Skip(s) => s.fetch(self, constraints),
            NodeKind::Join(j) => j.fetch(self, constraints),
            NodeKind::Project(p) => p.fetch(self, constraints),
            NodeKind::View(_) => Err(internal_err!("fetch cannot target a View, the terminal node")),
            #[cfg(feature = "testing")]
            NodeKind::Snitch(s) => s.fetch(self, constraints),
        }
    }

    /// Pull matching nodes from node `id`, releasing any scratch entries
    /// those nodes hold open (spec §4.3's `cleanup`). For node kinds with
    /// no scratch of their own (sources, connections, filters, project)
    /// this is identical to `fetch`.
    pub fn cleanup(&self, id: NodeId, constraints: &[Constraint]) -> IvmResult<LazyNodes> {
        let mut node = self.nodes[id.0].borrow_mut();
        match &mut *node {
            NodeKind::Source(_) => Err(internal_err!(
                "cleanup must target a Connection, not a Source directly"
            )),
            NodeKind::Connection(c) => {
                let (source, ordering) = (c.source, c.ordering.clone());
                let merged = merge_constraints(constraints, &c.optional_filters);
                drop(node);
                let mut src = self.nodes[source.0].borrow_mut();
                match &mut *src {
                    NodeKind::Source(s) => Ok(s.fetch(&ordering, &merged)),
                    _ => Err(internal_err!("Connection's source is not a Source node")),
                }
            }
            NodeKind::Filter(f) => f.cleanup(self, constraints),
            NodeKind::Take(t) => t.cleanup(self, constraints),
            NodeKind::Skip(s) => s.cleanup(self, constraints),
            NodeKind::Join(j) => j.cleanup(self, constraints),
            NodeKind::Project(p) => p.cleanup(self, constraints),
            NodeKind::View(_) => Err(internal_err!("cleanup cannot target a View, the terminal node")),
            #[cfg(feature = "testing")]
            NodeKind::Snitch(s) => s.cleanup(self, constraints),
        }
    }

    /// Pull nodes with `column == value`, the way a join consults its
    /// fast side (spec §4.2) instead of scanning. When `id` is a
    /// `Connection` wired directly to a `Source`, this builds/reuses the
    /// source's hash index on `column` rather than an ordered scan
    /// filtered after the fact; any other node kind has no index of its
    /// own to consult, so the equality is pushed down as an ordinary
    /// constraint on a regular `fetch`.
    pub fn fetch_equals(&self, id: NodeId, column: &str, value: &ivm_data::Value) -> IvmResult<LazyNodes> {
        let mut node = self.nodes[id.0].borrow_mut();
        match &mut *node {
            NodeKind::Connection(c) => {
                let (source, ordering, optional_filters) =
                    (c.source, c.ordering.clone(), c.optional_filters.clone());
                drop(node);
                let mut src = self.nodes[source.0].borrow_mut();
                match &mut *src {
                    NodeKind::Source(s) => Ok(s.fetch_equals(column, value, &ordering, &optional_filters)),
                    _ => Err(internal_err!("Connection's source is not a Source node")),
                }
            }
            _ => {
                let constraint = Constraint::new(column.to_string(), value.clone());
                drop(node);
                self.fetch(id, &[constraint])
            }
        }
    }

    /// The `cleanup` counterpart of [`Pipeline::fetch_equals`]: releases
    /// scratch the same index-accelerated way when `id` is a `Connection`
    /// (cleaning up a source connection is identical to fetching it — a
    /// connection holds no scratch of its own), falling back to the
    /// ordinary `cleanup` cascade for any node kind that does.
    pub fn cleanup_equals(&self, id: NodeId, column: &str, value: &ivm_data::Value) -> IvmResult<LazyNodes> {
        let mut node = self.nodes[id.0].borrow_mut();
        match &mut *node {
            NodeKind::Connection(c) => {
                let (source, ordering, optional_filters) =
                    (c.source, c.ordering.clone(), c.optional_filters.clone());
                drop(node);
                let mut src = self.nodes[source.0].borrow_mut();
                match &mut *src {
                    NodeKind::Source(s) => Ok(s.fetch_equals(column, value, &ordering, &optional_filters)),
                    _ => Err(internal_err!("Connection's source is not a Source node")),
                }
            }
            _ => {
                let constraint = Constraint::new(column.to_string(), value.clone());
                drop(node);
                self.cleanup(id, &[constraint])
            }
        }
    }

    /// Initial full materialization of a view: fetch everything from its
    /// upstream and apply each node as an `Add`.
    pub fn hydrate(&self, view: NodeId, upstream: NodeId) -> IvmResult<()> {
        let nodes = self.fetch(upstream, &[])?.drain_all();
        let mut node = self.nodes[view.0].borrow_mut();
        match &mut *node {
            NodeKind::View(v) => {
                for n in nodes {
                    v.apply(Change::Add(n))?;
                }
                Ok(())
            }
            _ => Err(internal_err!("hydrate target is not a View")),
        }
    }

    /// Tear down a view: release every scratch entry its upstream cascade
    /// holds open on its behalf, then clear its own state and listeners.
    pub fn destroy_view(&self, view: NodeId, upstream: NodeId) -> IvmResult<()> {
        self.cleanup(upstream, &[])?.discard();
        let mut node = self.nodes[view.0].borrow_mut();
        match &mut *node {
            NodeKind::View(v) => {
                v.destroy();
                Ok(())
            }
            _ => Err(internal_err!("destroy_view target is not a View")),
        }
    }

    pub fn view(&self, id: NodeId) -> std::cell::Ref<'_, ViewNode> {
        std::cell::Ref::map(self.nodes[id.0].borrow(), |n| match n {
            NodeKind::View(v) => v,
            _ => panic!("node {id:?} is not a View"),
        })
    }

    pub fn view_mut(&self, id: NodeId) -> std::cell::RefMut<'_, ViewNode> {
        std::cell::RefMut::map(self.nodes[id.0].borrow_mut(), |n| match n {
            NodeKind::View(v) => v,
            _ => panic!("node {id:?} is not a View"),
        })
    }

    #[cfg(feature = "testing")]
    pub fn snitch_mut(&self, id: NodeId) -> std::cell::RefMut<'_, SnitchNode> {
        std::cell::RefMut::map(self.nodes[id.0].borrow_mut(), |n| match n {
            NodeKind::Snitch(s) => s,
            _ => panic!("node {id:?} is not a Snitch"),
        })
    }

    /// Accessor used by tests to assert on [`JoinNode::scratch_len`] (spec
    /// §8's scratch quantified invariant); not otherwise needed by the
    /// engine itself, which only ever addresses a join through `push`.
    pub fn join(&self, id: NodeId) -> std::cell::Ref<'_, JoinNode> {
        std::cell::Ref::map(self.nodes[id.0].borrow(), |n| match n {
            NodeKind::Join(j) => j,
            _ => panic!("node {id:?} is not a Join"),
        })
    }
}

/// Conjoin an ad-hoc `fetch`/`cleanup` request with a connection's own
/// declared `optional_filters`: the row must satisfy both.
fn merge_constraints(requested: &[Constraint], declared: &[Constraint]) -> Vec<Constraint> {
    let mut merged = Vec::with_capacity(requested.len() + declared.len());
    merged.extend_from_slice(declared);
    merged.extend_from_slice(requested);
    merged
}
