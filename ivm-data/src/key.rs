use serde::{Deserialize, Serialize};

use crate::value::Value;

/// An ordered tuple of column values: a source's primary key, a join's
/// child/parent join value, or a scratch-map key.
///
/// A sharded, replay-driven dataflow engine typically specializes this into
/// one enum variant per small fixed arity (`Single`, `Double`, ...) to avoid
/// a heap allocation per lookup on the hot path. This engine keeps the
/// single general `Vec`-backed form instead: that specialization exists to
/// avoid allocating on every partial-state lookup in a sharded,
/// replay-driven dataflow domain, a concern this synchronous, unsharded
/// engine doesn't share.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(Vec<Value>);

impl Key {
    pub fn new(values: Vec<Value>) -> Self {
        Key(values)
    }

    pub fn single(value: Value) -> Self {
        Key(vec![value])
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

impl From<Vec<Value>> for Key {
    fn from(values: Vec<Value>) -> Self {
        Key(values)
    }
}

impl FromIterator<Value> for Key {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Key(iter.into_iter().collect())
    }
}
