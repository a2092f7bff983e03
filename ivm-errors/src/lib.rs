//! The error taxonomy for the IVM dataflow core, matching spec §7.
//!
//! Every fallible entry point into the engine (`Source::push`,
//! `Input::fetch`/`cleanup`, `View::hydrate`) returns [`IvmResult`].
//! Source-level and operator-level errors are always fatal for the *current*
//! push: the caller must not assume partial progress was made on the
//! rejected change, and implementations must leave their own state
//! unchanged before returning one of these.

use thiserror::Error;

/// A single failure mode surfaced by the dataflow core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IvmError {
    /// Raised at construction of a source, join, or view when the declared
    /// schema is unsound: a duplicate column, a missing/empty primary key,
    /// or relationship names that collide with a column or with each other.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// A `SourceChange::Add` named a primary key that is already present in
    /// the source.
    #[error("duplicate primary key: {0}")]
    DuplicatePrimaryKey(String),

    /// A `SourceChange::Remove` or the old side of a `SourceChange::Edit`
    /// named a row that either does not exist at that primary key, or
    /// exists but does not match the claimed column values.
    #[error("row not found: {0}")]
    NotFound(String),

    /// A `SourceChange::Edit` claimed to be PK-preserving (via a sibling
    /// decomposition upstream) but the old and new rows disagree on a
    /// primary-key column.
    #[error("primary key mismatch on edit: {0}")]
    PrimaryKeyMismatch(String),

    /// An edit's old row failed to satisfy a constraint that the engine had
    /// assumed held for it (e.g. a constraint pushed down to a source that
    /// the source claims to apply via `appliedFilters`).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// An internal invariant was broken — e.g. a `singular` relationship
    /// received a second child. This indicates a bug in an upstream
    /// operator or in the caller's use of the public contract, not a
    /// user-correctable condition.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// A change arrived at an operator in an order its contract forbids
    /// (e.g. a `push` while a previously returned `LazyNodes` from the same
    /// node is still outstanding).
    #[error("out-of-order operation: {0}")]
    OutOfOrder(String),

    /// A [`LazyNodes`](https://docs.rs/ivm-dataflow) sequence was dropped
    /// before being fully consumed or explicitly cleaned up, leaking the
    /// scratch entries it was holding open.
    #[error("lazy sequence abandoned: {0}")]
    LazySequenceAbandoned(String),

    /// Catch-all for assertion-style failures that don't have a more
    /// specific variant yet.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Shorthand used throughout the engine in place of `std::result::Result`.
pub type IvmResult<T> = Result<T, IvmError>;

impl IvmError {
    /// Build an [`IvmError::Internal`] from anything `Display`-able, an
    /// escape hatch for wrapping an ad-hoc message without requiring a
    /// dedicated variant for every possible assertion failure.
    pub fn internal(msg: impl Into<String>) -> Self {
        IvmError::Internal(msg.into())
    }
}

/// Construct an [`IvmError::Internal`], formatting its arguments the way
/// `format!` does.
#[macro_export]
macro_rules! internal_err {
    ($($arg:tt)*) => {
        $crate::IvmError::internal(format!($($arg)*))
    };
}
