//! Incremental view-maintenance dataflow core: rows flow from a
//! [`source::SourceNode`] through a chain of operators in `ops` to a
//! [`view::ViewNode`], each primitive change pushed all the way through to
//! a fully materialized result before the call returns (spec §5's
//! synchronous-cascade model).
//!
//! Everything above a source speaks in [`change::Change`]; a
//! [`pipeline::Pipeline`] owns every node in one query and is the only way
//! to wire them together or drive a change through them.

pub mod change;
pub mod hash_index;
pub mod lazy;
pub mod ops;
pub mod pipeline;
pub mod source;
#[cfg(feature = "testing")]
pub mod testing;
pub mod view;

pub use change::{Change, Node, SourceChange};
pub use hash_index::HashIndex;
pub use lazy::LazyNodes;
pub use ops::filter::{CompareOp, FilterNode, Predicate};
pub use ops::join::JoinNode;
pub use ops::project::ProjectNode;
pub use ops::skip::SkipNode;
pub use ops::take::TakeNode;
pub use pipeline::{NodeId, NodeKind, Pipeline};
pub use source::{ColumnSpec, ColumnType, ConnectionNode, SourceNode, SourceSchema};
pub use view::{ViewNode, ViewSchema};

#[cfg(feature = "testing")]
pub use testing::{Catch, Replay, SnitchNode};
