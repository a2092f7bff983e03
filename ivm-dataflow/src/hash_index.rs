use std::collections::{HashMap, HashSet};

use ivm_data::{Key, Value};

/// A `column value -> set of primary keys` index over one source (spec
/// §4.2), built lazily on first request and maintained synchronously by the
/// owning source on every `push`. Shared read-only by every join that
/// requested it; the source is the sole writer.
#[derive(Debug, Default)]
pub struct HashIndex {
    column: String,
    map: HashMap<Value, HashSet<Key>>,
}

impl HashIndex {
    pub fn new(column: impl Into<String>) -> Self {
        HashIndex {
            column: column.into(),
            map: HashMap::new(),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn insert(&mut self, value: Value, pk: Key) {
        self.map.entry(value).or_default().insert(pk);
    }

    pub fn remove(&mut self, value: &Value, pk: &Key) {
        if let Some(set) = self.map.get_mut(value) {
            set.remove(pk);
            if set.is_empty() {
                self.map.remove(value);
            }
        }
    }

    pub fn get(&self, value: &Value) -> impl Iterator<Item = &Key> {
        self.map.get(value).into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let mut idx = HashIndex::new("issue_id");
        let v = Value::from("i1");
        idx.insert(v.clone(), Key::single(Value::from(1_i64)));
        idx.insert(v.clone(), Key::single(Value::from(2_i64)));
        let got: Vec<_> = idx.get(&v).cloned().collect();
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn remove_drops_empty_bucket() {
        let mut idx = HashIndex::new("issue_id");
        let v = Value::from("i1");
        let pk = Key::single(Value::from(1_i64));
        idx.insert(v.clone(), pk.clone());
        idx.remove(&v, &pk);
        assert_eq!(idx.get(&v).count(), 0);
    }
}
