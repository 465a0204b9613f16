//! Reactive partition of an observable vector by a computed key.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::reactive::{
    Change, Disposer, Effect, Identity, ObservableMap, ObservableVec, Runtime, VecChange,
};

static NEXT_GROUP_MAP: AtomicU64 = AtomicU64::new(0);

type KeyToName<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;
type GroupBy<K, T> = Arc<dyn Fn(&T) -> K + Send + Sync>;

/// Construction options for a [`GroupedObservableMap`].
pub struct GroupMapOptions<K> {
    /// Debug name of the map.
    pub name: Option<String>,
    /// Renders a key for bucket names. Defaults to the key's `Debug` output.
    pub key_to_name: Option<KeyToName<K>>,
}

impl<K> Default for GroupMapOptions<K> {
    fn default() -> Self {
        Self {
            name: None,
            key_to_name: None,
        }
    }
}

struct ItemMeta<K> {
    key: K,
    index: usize,
    reaction: Effect,
}

struct Shared<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    name: String,
    key_to_name: KeyToName<K>,
    group_by: GroupBy<K, T>,
    buckets: ObservableMap<K, ObservableVec<T>>,
    items: Mutex<HashMap<usize, ItemMeta<K>>>,
    base_listener: Mutex<Option<Disposer>>,
    base: ObservableVec<T>,
}

impl<K, T> Shared<K, T>
where
    K: Eq + Hash + Clone + PartialEq + Debug + Send + Sync + 'static,
    T: Identity + Clone + Send + Sync + 'static,
{
    fn apply(self: &Arc<Self>, change: &VecChange<T>) {
        Runtime::untracked(|| {
            Runtime::transaction(|| match change {
                Change::Splice { removed, added, .. } => {
                    for item in removed {
                        self.remove_item(item);
                    }
                    for item in added {
                        self.add_item(item.clone());
                    }
                }
                Change::Update {
                    old_value,
                    new_value,
                    ..
                } => {
                    self.remove_item(old_value);
                    self.add_item(new_value.clone());
                }
                other => {
                    tracing::error!(map = %self.name, kind = ?other.kind(), "unexpected vector change");
                }
            })
        });
    }

    fn bucket(&self, key: &K) -> ObservableVec<T> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket;
        }
        let bucket = ObservableVec::named(format!("GroupArray[{}]", (self.key_to_name)(key)), Vec::new());
        self.buckets.set(key.clone(), bucket.clone());
        bucket
    }

    fn add_item(self: &Arc<Self>, item: T) {
        let id = item.identity();
        if self.items.lock().contains_key(&id) {
            tracing::error!(map = %self.name, id, "item is already grouped, skipping duplicate");
            return;
        }

        let key = (self.group_by)(&item);
        let bucket = self.bucket(&key);
        let index = bucket.len();
        bucket.push(item.clone());

        let group_by = Arc::clone(&self.group_by);
        let weak: Weak<Self> = Arc::downgrade(self);
        let tracked = item.clone();
        let reaction = Effect::reaction(
            move || group_by(&tracked),
            move |new_key: &K| {
                if let Some(shared) = weak.upgrade() {
                    shared.move_item(&item, new_key.clone());
                }
            },
            false,
        );

        self.items.lock().insert(id, ItemMeta { key, index, reaction });
    }

    fn remove_item(&self, item: &T) {
        let id = item.identity();
        let Some(meta) = self.items.lock().remove(&id) else {
            tracing::debug!(map = %self.name, id, "removed item was not grouped");
            return;
        };
        meta.reaction.dispose();
        self.remove_from_bucket(&meta.key, meta.index);
    }

    fn move_item(&self, item: &T, new_key: K) {
        let id = item.identity();
        let Some((old_key, old_index)) = self
            .items
            .lock()
            .get(&id)
            .map(|meta| (meta.key.clone(), meta.index))
        else {
            return;
        };
        if old_key == new_key {
            return;
        }

        Runtime::transaction(|| {
            self.remove_from_bucket(&old_key, old_index);
            let bucket = self.bucket(&new_key);
            let index = bucket.len();
            bucket.push(item.clone());
            if let Some(meta) = self.items.lock().get_mut(&id) {
                meta.key = new_key.clone();
                meta.index = index;
            }
        });
        tracing::debug!(
            map = %self.name,
            from = %(self.key_to_name)(&old_key),
            to = %(self.key_to_name)(&new_key),
            "item moved between groups"
        );
    }

    /// Remove the element at `index`, filling the hole with the last element.
    fn remove_from_bucket(&self, key: &K, index: usize) {
        let Some(bucket) = self.buckets.get(key) else {
            return;
        };
        let len = bucket.len();
        if len <= 1 {
            self.buckets.delete(key);
        } else if index + 1 >= len {
            bucket.pop();
        } else if let Some(last) = bucket.get(len - 1) {
            if bucket.set(index, last.clone()).is_ok() {
                if let Some(meta) = self.items.lock().get_mut(&last.identity()) {
                    meta.index = index;
                }
            }
            bucket.pop();
        }
    }

    fn dispose(&self) {
        if let Some(listener) = self.base_listener.lock().take() {
            listener.dispose();
        }
        let metas: Vec<ItemMeta<K>> = self.items.lock().drain().map(|(_, meta)| meta).collect();
        for meta in metas {
            meta.reaction.dispose();
        }
    }
}

impl<K, T> Drop for Shared<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(listener) = self.base_listener.get_mut().take() {
            listener.dispose();
        }
    }
}

/// Read-only map from group key to the items of a base vector in that group.
///
/// Every item's key is tracked by its own reaction, so an item moves to its
/// new bucket as soon as whatever `group_by` reads changes. Buckets are
/// created on demand and removed when they become empty. Moves happen in
/// one transaction: reactions never see an item in two buckets or in none.
///
/// ```
/// use std::sync::Arc;
/// use tether_core::collection::GroupedObservableMap;
/// use tether_core::reactive::{ObservableVec, Signal};
///
/// let a = Arc::new(Signal::new("red"));
/// let b = Arc::new(Signal::new("blue"));
/// let base = ObservableVec::new(vec![a.clone(), b.clone()]);
/// let groups = GroupedObservableMap::new(&base, |item: &Arc<Signal<&'static str>>| item.get());
///
/// assert_eq!(groups.len(), 2);
/// b.set("red");
/// assert_eq!(groups.get(&"red").map(|bucket| bucket.len()), Some(2));
/// assert!(!groups.contains_key(&"blue"));
/// ```
pub struct GroupedObservableMap<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    shared: Arc<Shared<K, T>>,
}

impl<K, T> GroupedObservableMap<K, T>
where
    K: Eq + Hash + Clone + PartialEq + Debug + Send + Sync + 'static,
    T: Identity + Clone + Send + Sync + 'static,
{
    pub fn new<G>(base: &ObservableVec<T>, group_by: G) -> Self
    where
        G: Fn(&T) -> K + Send + Sync + 'static,
    {
        Self::with_options(base, group_by, GroupMapOptions::default())
    }

    pub fn with_options<G>(base: &ObservableVec<T>, group_by: G, options: GroupMapOptions<K>) -> Self
    where
        G: Fn(&T) -> K + Send + Sync + 'static,
    {
        let name = options
            .name
            .unwrap_or_else(|| format!("ogm{}", NEXT_GROUP_MAP.fetch_add(1, Ordering::Relaxed)));
        let key_to_name: KeyToName<K> = match options.key_to_name {
            Some(key_to_name) => key_to_name,
            None => Arc::new(|key: &K| format!("{key:?}")),
        };

        let shared = Arc::new(Shared {
            buckets: ObservableMap::named(name.clone()),
            name,
            key_to_name,
            group_by: Arc::new(group_by),
            items: Mutex::new(HashMap::new()),
            base_listener: Mutex::new(None),
            base: base.clone(),
        });

        Runtime::untracked(|| {
            Runtime::transaction(|| {
                for item in base.to_vec_untracked() {
                    shared.add_item(item);
                }
            })
        });

        let weak = Arc::downgrade(&shared);
        let listener = base.observe(move |change| {
            if let Some(shared) = weak.upgrade() {
                shared.apply(change);
            }
        });
        *shared.base_listener.lock() = Some(listener);

        Self { shared }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The bucket for `key`.
    pub fn get(&self, key: &K) -> Option<ObservableVec<T>> {
        self.shared.buckets.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.shared.buckets.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.shared.buckets.keys()
    }

    pub fn entries(&self) -> Vec<(K, ObservableVec<T>)> {
        self.shared.buckets.entries()
    }

    /// Number of non-empty groups.
    pub fn len(&self) -> usize {
        self.shared.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Always fails: the map is derived from its base vector.
    pub fn set(&self, _key: K, _bucket: ObservableVec<T>) -> Result<()> {
        Err(Error::read_only(self.shared.name.clone()))
    }

    /// Always fails: the map is derived from its base vector.
    pub fn delete(&self, _key: &K) -> Result<()> {
        Err(Error::read_only(self.shared.name.clone()))
    }

    /// Always fails: the map is derived from its base vector.
    pub fn clear(&self) -> Result<()> {
        Err(Error::read_only(self.shared.name.clone()))
    }

    /// Stop following the base vector and every item's key.
    ///
    /// The buckets keep their last contents. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    /// The vector this map is grouping.
    pub fn base(&self) -> &ObservableVec<T> {
        &self.shared.base
    }

    /// Number of items currently grouped.
    pub fn item_count(&self) -> usize {
        self.shared.items.lock().len()
    }
}

impl<K, T> std::fmt::Debug for GroupedObservableMap<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupedObservableMap")
            .field("name", &self.shared.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Signal;

    struct Task {
        title: &'static str,
        status: Signal<&'static str>,
    }

    type Item = Arc<Task>;

    fn task(title: &'static str, status: &'static str) -> Item {
        Arc::new(Task {
            title,
            status: Signal::new(status),
        })
    }

    fn by_status(base: &ObservableVec<Item>) -> GroupedObservableMap<&'static str, Item> {
        GroupedObservableMap::new(base, |item: &Item| item.status.get())
    }

    fn titles(groups: &GroupedObservableMap<&'static str, Item>, key: &'static str) -> Vec<&'static str> {
        groups
            .get(&key)
            .map(|bucket| bucket.to_vec().iter().map(|t| t.title).collect())
            .unwrap_or_default()
    }

    #[test]
    fn seeds_initial_items() {
        let base = ObservableVec::new(vec![task("a", "todo"), task("b", "done"), task("c", "todo")]);
        let groups = by_status(&base);

        assert_eq!(groups.len(), 2);
        assert_eq!(titles(&groups, "todo"), vec!["a", "c"]);
        assert_eq!(titles(&groups, "done"), vec!["b"]);
        assert_eq!(groups.item_count(), 3);
    }

    #[test]
    fn key_change_moves_item() {
        let b = task("b", "todo");
        let base = ObservableVec::new(vec![task("a", "todo"), b.clone()]);
        let groups = by_status(&base);

        b.status.set("done");
        assert_eq!(titles(&groups, "todo"), vec!["a"]);
        assert_eq!(titles(&groups, "done"), vec!["b"]);

        b.status.set("todo");
        assert_eq!(titles(&groups, "todo"), vec!["a", "b"]);
        assert!(!groups.contains_key(&"done"));
    }

    #[test]
    fn removal_compacts_with_last_element() {
        let (a, b, c) = (task("a", "x"), task("b", "x"), task("c", "x"));
        let base = ObservableVec::new(vec![a.clone(), b.clone(), c.clone()]);
        let groups = by_status(&base);

        base.splice(0, 1, Vec::new());
        assert_eq!(titles(&groups, "x"), vec!["c", "b"]);

        // c now sits at index 0 and must still move out cleanly.
        c.status.set("y");
        assert_eq!(titles(&groups, "x"), vec!["b"]);
        assert_eq!(titles(&groups, "y"), vec!["c"]);
    }

    #[test]
    fn splice_and_update_follow_the_base() {
        let base = ObservableVec::new(vec![task("a", "x")]);
        let groups = by_status(&base);

        base.push(task("b", "y"));
        assert_eq!(titles(&groups, "y"), vec!["b"]);

        assert!(base.set(0, task("c", "y")).is_ok());
        assert!(!groups.contains_key(&"x"));
        assert_eq!(titles(&groups, "y"), vec!["b", "c"]);
        assert_eq!(groups.item_count(), 2);
    }

    #[test]
    fn item_is_always_in_exactly_one_bucket() {
        let moving = task("m", "a");
        let base = ObservableVec::new(vec![moving.clone(), task("o", "a"), task("p", "b")]);
        let groups = Arc::new(by_status(&base));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (g, s, id) = (groups.clone(), seen.clone(), moving.identity());
        let _effect = Effect::new(move || {
            let count = g
                .entries()
                .iter()
                .map(|(_, bucket)| bucket.to_vec().iter().filter(|t| t.identity() == id).count())
                .sum::<usize>();
            s.lock().push(count);
        });

        moving.status.set("b");
        moving.status.set("c");
        moving.status.set("a");
        assert!(seen.lock().len() > 1);
        assert!(seen.lock().iter().all(|count| *count == 1));
    }

    #[test]
    fn mutators_are_rejected() {
        let base = ObservableVec::new(vec![task("a", "x")]);
        let groups = GroupedObservableMap::with_options(
            &base,
            |item: &Item| item.status.get(),
            GroupMapOptions {
                name: Some("by-status".to_string()),
                key_to_name: None,
            },
        );

        let expected = Err(Error::ReadOnly("by-status".to_string()));
        assert_eq!(groups.set("y", ObservableVec::new(Vec::new())), expected);
        assert_eq!(groups.delete(&"x"), expected);
        assert_eq!(groups.clear(), expected);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn bucket_names_use_key_to_name() {
        let base = ObservableVec::new(vec![task("a", "x")]);
        let groups = GroupedObservableMap::with_options(
            &base,
            |item: &Item| item.status.get(),
            GroupMapOptions {
                name: None,
                key_to_name: Some(Arc::new(|key: &&str| key.to_uppercase())),
            },
        );

        assert_eq!(groups.get(&"x").map(|b| b.name().to_string()), Some("GroupArray[X]".to_string()));
    }

    #[test]
    fn duplicates_are_skipped() {
        let a = task("a", "x");
        let base = ObservableVec::new(vec![a.clone(), a.clone()]);
        let groups = by_status(&base);

        assert_eq!(titles(&groups, "x"), vec!["a"]);
        assert_eq!(groups.item_count(), 1);
    }

    #[test]
    fn dispose_stops_following() {
        let a = task("a", "x");
        let base = ObservableVec::new(vec![a.clone()]);
        let groups = by_status(&base);
        assert_eq!(base.listener_count(), 1);
        assert_eq!(a.status.observer_count(), 1);

        groups.dispose();
        groups.dispose();
        assert_eq!(base.listener_count(), 0);
        assert_eq!(a.status.observer_count(), 0);

        a.status.set("y");
        base.push(task("b", "z"));
        assert_eq!(titles(&groups, "x"), vec!["a"]);
        assert!(!groups.contains_key(&"z"));
    }
}
