//! Nested map keyed by argument tuples.

use std::collections::HashMap;

use super::key::MemoKey;
use crate::error::{Error, Result};

enum Slot<V> {
    Value(V),
    Nested(HashMap<MemoKey, Slot<V>>),
}

/// Map from an argument tuple to a value, one level per argument.
///
/// Every tuple stored in one map must have the same arity. Levels left
/// empty by a removal are pruned.
pub struct DeepMap<V> {
    name: String,
    arity: Option<usize>,
    unit: Option<V>,
    root: HashMap<MemoKey, Slot<V>>,
    len: usize,
}

impl<V> DeepMap<V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arity: None,
            unit: None,
            root: HashMap::new(),
            len: 0,
        }
    }

    /// Fix the arity on first use and reject any other arity afterwards.
    pub fn check_arity(&mut self, got: usize) -> Result<()> {
        match self.arity {
            None => {
                self.arity = Some(got);
                Ok(())
            }
            Some(expected) if expected == got => Ok(()),
            Some(expected) => Err(Error::ArityMismatch {
                name: self.name.clone(),
                expected,
                got,
            }),
        }
    }

    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    pub fn get(&self, keys: &[MemoKey]) -> Option<&V> {
        let Some((last, path)) = keys.split_last() else {
            return self.unit.as_ref();
        };
        let mut level = &self.root;
        for key in path {
            match level.get(key) {
                Some(Slot::Nested(next)) => level = next,
                _ => return None,
            }
        }
        match level.get(last) {
            Some(Slot::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, keys: &[MemoKey]) -> bool {
        self.get(keys).is_some()
    }

    /// Store `value`, returning the value it replaced.
    pub fn insert(&mut self, keys: &[MemoKey], value: V) -> Option<V> {
        let previous = match keys.split_last() {
            None => self.unit.replace(value),
            Some(_) => insert_in(&mut self.root, keys, value),
        };
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    /// Remove the value stored for `keys`.
    ///
    /// Fails with [`Error::MissingEntry`] when nothing is stored there.
    pub fn remove(&mut self, keys: &[MemoKey]) -> Result<V> {
        let removed = if keys.is_empty() {
            self.unit.take()
        } else {
            remove_in(&mut self.root, keys)
        };
        match removed {
            Some(value) => {
                self.len -= 1;
                Ok(value)
            }
            None => Err(Error::MissingEntry(format!("{} {:?}", self.name, keys))),
        }
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of entries directly under the root level.
    pub fn root_len(&self) -> usize {
        self.root.len() + usize::from(self.unit.is_some())
    }

    /// Take every stored value out of the map.
    pub fn drain(&mut self) -> Vec<V> {
        let mut values = Vec::with_capacity(self.len);
        values.extend(self.unit.take());
        drain_into(std::mem::take(&mut self.root), &mut values);
        self.len = 0;
        values
    }
}

fn insert_in<V>(level: &mut HashMap<MemoKey, Slot<V>>, keys: &[MemoKey], value: V) -> Option<V> {
    let (first, rest) = keys.split_first()?;
    if rest.is_empty() {
        return match level.insert(first.clone(), Slot::Value(value)) {
            Some(Slot::Value(old)) => Some(old),
            _ => None,
        };
    }
    let slot = level
        .entry(first.clone())
        .or_insert_with(|| Slot::Nested(HashMap::new()));
    match *slot {
        Slot::Nested(ref mut next) => insert_in(next, rest, value),
        Slot::Value(_) => {
            let mut next = HashMap::new();
            insert_in(&mut next, rest, value);
            *slot = Slot::Nested(next);
            None
        }
    }
}

fn remove_in<V>(level: &mut HashMap<MemoKey, Slot<V>>, keys: &[MemoKey]) -> Option<V> {
    let (first, rest) = keys.split_first()?;
    if rest.is_empty() {
        return match level.remove(first) {
            Some(Slot::Value(value)) => Some(value),
            Some(nested) => {
                level.insert(first.clone(), nested);
                None
            }
            None => None,
        };
    }
    let Some(Slot::Nested(next)) = level.get_mut(first) else {
        return None;
    };
    let removed = remove_in(next, rest);
    if next.is_empty() {
        level.remove(first);
    }
    removed
}

fn drain_into<V>(level: HashMap<MemoKey, Slot<V>>, out: &mut Vec<V>) {
    for (_, slot) in level {
        match slot {
            Slot::Value(value) => out.push(value),
            Slot::Nested(next) => drain_into(next, out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memoize::key::AsMemoKey;

    fn keys(parts: &[i64]) -> Vec<MemoKey> {
        parts.iter().map(AsMemoKey::as_memo_key).collect()
    }

    #[test]
    fn stores_per_tuple() {
        let mut map = DeepMap::new("sum");
        map.insert(&keys(&[1, 2]), "a");
        map.insert(&keys(&[1, 3]), "b");

        assert_eq!(map.get(&keys(&[1, 2])), Some(&"a"));
        assert_eq!(map.get(&keys(&[1, 3])), Some(&"b"));
        assert_eq!(map.get(&keys(&[2, 2])), None);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn prunes_emptied_levels() {
        let mut map = DeepMap::new("sum");
        map.insert(&keys(&[1, 2, 3]), 6);
        map.insert(&keys(&[4, 5, 6]), 15);
        assert_eq!(map.root_len(), 2);

        assert_eq!(map.remove(&keys(&[1, 2, 3])), Ok(6));
        assert_eq!(map.root_len(), 1);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn removing_absent_entry_fails() {
        let mut map: DeepMap<i32> = DeepMap::new("sum");
        map.insert(&keys(&[1]), 1);

        assert!(matches!(map.remove(&keys(&[2])), Err(Error::MissingEntry(_))));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn arity_is_fixed_by_first_use() {
        let mut map: DeepMap<i32> = DeepMap::new("sum");
        assert!(map.check_arity(2).is_ok());
        assert!(map.check_arity(2).is_ok());
        assert_eq!(
            map.check_arity(3),
            Err(Error::ArityMismatch {
                name: "sum".to_string(),
                expected: 2,
                got: 3,
            })
        );
    }

    #[test]
    fn zero_arity_uses_single_slot() {
        let mut map = DeepMap::new("constant");
        assert_eq!(map.insert(&[], 1), None);
        assert_eq!(map.insert(&[], 2), Some(1));
        assert_eq!(map.get(&[]), Some(&2));
        assert_eq!(map.remove(&[]), Ok(2));
        assert!(map.is_empty());
    }

    #[test]
    fn drain_empties_map() {
        let mut map = DeepMap::new("sum");
        map.insert(&keys(&[1, 1]), 1);
        map.insert(&keys(&[1, 2]), 2);
        let mut values = map.drain();
        values.sort_unstable();

        assert_eq!(values, vec![1, 2]);
        assert!(map.is_empty());
        assert_eq!(map.root_len(), 0);
    }
}
