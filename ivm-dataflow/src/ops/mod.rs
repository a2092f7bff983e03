//! Operator implementations (spec §4.3–§4.5): one module per operator
//! kind, each owning its own scratch and knowing only the [`crate::pipeline::NodeId`]
//! of its upstream(s) and downstream.

pub mod filter;
pub mod join;
pub mod project;
pub mod skip;
pub mod take;
