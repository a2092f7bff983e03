//! The data model shared by every layer of the IVM dataflow core: values,
//! rows, keys, primary keys, orderings, and constraints (spec §3).

mod constraint;
mod key;
mod row;
mod schema;
mod value;

pub use constraint::Constraint;
pub use key::Key;
pub use row::Row;
pub use schema::{Direction, OrderColumn, Ordering, PrimaryKey, SortKey};
pub use value::Value;
