//! Observable Collections
//!
//! Vectors, maps and string-keyed objects that report reads and writes to an
//! [`Atom`] and deliver structural change events to listeners.
//!
//! Every mutation runs inside a batch. The change event is delivered
//! synchronously after the data has been updated, so a listener that reads
//! the collection sees the new state; reactions scheduled by the mutation run
//! after all listeners have returned.

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::atom::Atom;
use super::runtime::Runtime;
use super::{Disposer, Signal};
use crate::error::{Error, Result};

/// Stable identity of a handle, for out-of-band side tables.
///
/// Two handles have the same identity exactly when they refer to the same
/// underlying allocation. The value is only meaningful while that allocation
/// is alive.
pub trait Identity {
    /// Address-derived identity of the underlying allocation.
    fn identity(&self) -> usize;
}

impl<T: ?Sized> Identity for Arc<T> {
    fn identity(&self) -> usize {
        Arc::as_ptr(self).cast::<()>() as usize
    }
}

impl<T> Identity for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn identity(&self) -> usize {
        self.id().raw() as usize
    }
}

/// Kind of a [`Change`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
    Delete,
    Splice,
}

/// A structural change to an observable collection.
///
/// Objects report removals as `Remove`, maps as `Delete`. Vectors report
/// element replacement as `Update` (keyed by index) and everything else as
/// `Splice`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Change<K, V> {
    Add {
        key: K,
        new_value: V,
    },
    Update {
        key: K,
        old_value: V,
        new_value: V,
    },
    Remove {
        key: K,
        old_value: V,
    },
    Delete {
        key: K,
        old_value: V,
    },
    Splice {
        index: usize,
        removed: Vec<V>,
        added: Vec<V>,
        removed_count: usize,
        added_count: usize,
    },
}

impl<K, V> Change<K, V> {
    /// The kind of this change.
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Add { .. } => ChangeKind::Add,
            Change::Update { .. } => ChangeKind::Update,
            Change::Remove { .. } => ChangeKind::Remove,
            Change::Delete { .. } => ChangeKind::Delete,
            Change::Splice { .. } => ChangeKind::Splice,
        }
    }
}

/// Change events emitted by [`ObservableVec`].
pub type VecChange<V> = Change<usize, V>;

type Listener<C> = Arc<dyn Fn(&C) + Send + Sync>;

/// Registered change listeners, notified in registration order.
struct Listeners<C> {
    next: AtomicU64,
    entries: Arc<Mutex<IndexMap<u64, Listener<C>>>>,
}

impl<C: 'static> Listeners<C> {
    fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            entries: Arc::new(Mutex::new(IndexMap::new())),
        }
    }

    fn add(&self, listener: Listener<C>) -> Disposer {
        let key = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(key, listener);
        let entries = Arc::downgrade(&self.entries);
        Disposer::new(move || {
            if let Some(entries) = entries.upgrade() {
                entries.lock().shift_remove(&key);
            }
        })
    }

    fn emit(&self, change: &C) {
        let listeners: Vec<Listener<C>> = self.entries.lock().values().cloned().collect();
        for listener in listeners {
            listener(change);
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

// ----------------------------------------------------------------------------
// ObservableVec
// ----------------------------------------------------------------------------

struct VecInner<V> {
    atom: Atom,
    items: RwLock<Vec<V>>,
    listeners: Listeners<VecChange<V>>,
}

/// An observable, ordered sequence.
pub struct ObservableVec<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<VecInner<V>>,
}

impl<V> ObservableVec<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a vector holding `items`.
    pub fn new(items: Vec<V>) -> Self {
        Self::named("ObservableVec", items)
    }

    /// Create a vector with a debug name.
    pub fn named(name: impl Into<String>, items: Vec<V>) -> Self {
        Self {
            inner: Arc::new(VecInner {
                atom: Atom::new(name),
                items: RwLock::new(items),
                listeners: Listeners::new(),
            }),
        }
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.atom.report_observed();
        self.inner.items.read().len()
    }

    /// Whether the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<V> {
        self.inner.atom.report_observed();
        self.inner.items.read().get(index).cloned()
    }

    /// Snapshot of all elements.
    pub fn to_vec(&self) -> Vec<V> {
        self.inner.atom.report_observed();
        self.inner.items.read().clone()
    }

    /// Snapshot of all elements without tracking the read.
    pub fn to_vec_untracked(&self) -> Vec<V> {
        self.inner.items.read().clone()
    }

    /// Read the elements by reference.
    ///
    /// `f` must not mutate this vector.
    pub fn with<R>(&self, f: impl FnOnce(&[V]) -> R) -> R {
        self.inner.atom.report_observed();
        f(&self.inner.items.read())
    }

    /// Replace the element at `index`.
    ///
    /// Writing at `len()` appends.
    pub fn set(&self, index: usize, value: V) -> Result<()> {
        let old_value = {
            let mut items = self.inner.items.write();
            let len = items.len();
            if index > len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
            if index == len {
                None
            } else {
                Some(std::mem::replace(&mut items[index], value.clone()))
            }
        };
        match old_value {
            Some(old_value) => self.notify(Change::Update {
                key: index,
                old_value,
                new_value: value,
            }),
            None => {
                self.splice(index, 0, vec![value]);
            }
        }
        Ok(())
    }

    /// Remove `delete_count` elements at `index` and insert `new_items`
    /// there. Returns the removed elements.
    ///
    /// `index` and `delete_count` are clamped to the vector.
    pub fn splice(&self, index: usize, delete_count: usize, new_items: Vec<V>) -> Vec<V> {
        let (index, removed) = {
            let mut items = self.inner.items.write();
            let index = index.min(items.len());
            let delete_count = delete_count.min(items.len() - index);
            if delete_count == 0 && new_items.is_empty() {
                return Vec::new();
            }
            let removed: Vec<V> = items
                .splice(index..index + delete_count, new_items.iter().cloned())
                .collect();
            (index, removed)
        };
        self.notify(Change::Splice {
            index,
            removed_count: removed.len(),
            added_count: new_items.len(),
            removed: removed.clone(),
            added: new_items,
        });
        removed
    }

    /// Append an element.
    pub fn push(&self, value: V) {
        let len = self.inner.items.read().len();
        self.splice(len, 0, vec![value]);
    }

    /// Append several elements in one change.
    pub fn extend(&self, values: Vec<V>) {
        let len = self.inner.items.read().len();
        self.splice(len, 0, values);
    }

    /// Insert an element at `index` (clamped).
    pub fn insert(&self, index: usize, value: V) {
        self.splice(index, 0, vec![value]);
    }

    /// Remove and return the element at `index`.
    pub fn remove(&self, index: usize) -> Result<V> {
        let len = self.inner.items.read().len();
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        self.splice(index, 1, Vec::new())
            .pop()
            .ok_or(Error::IndexOutOfBounds { index, len })
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<V> {
        let len = self.inner.items.read().len();
        if len == 0 {
            return None;
        }
        self.splice(len - 1, 1, Vec::new()).pop()
    }

    /// Remove every element, returning them.
    pub fn clear(&self) -> Vec<V> {
        self.splice(0, usize::MAX, Vec::new())
    }

    /// Replace the whole contents in one change.
    pub fn replace(&self, items: Vec<V>) -> Vec<V> {
        self.splice(0, usize::MAX, items)
    }

    /// Move the element at `from` to position `to`, shifting the elements in
    /// between. Both indices must be in bounds.
    pub fn move_item(&self, from: usize, to: usize) -> Result<()> {
        let mut items = self.inner.items.read().clone();
        let len = items.len();
        for index in [from, to] {
            if index >= len {
                return Err(Error::IndexOutOfBounds { index, len });
            }
        }
        if from == to {
            return Ok(());
        }
        let item = items.remove(from);
        items.insert(to, item);
        self.replace(items);
        Ok(())
    }

    /// Register a change listener.
    pub fn observe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&VecChange<V>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Number of derivations observing the vector.
    pub fn observer_count(&self) -> usize {
        self.inner.atom.observer_count()
    }

    /// Whether two handles point at the same vector.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn notify(&self, change: VecChange<V>) {
        let _batch = Runtime::batch();
        self.inner.atom.report_changed();
        self.inner.listeners.emit(&change);
    }
}

impl<V> Clone for ObservableVec<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Identity for ObservableVec<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn identity(&self) -> usize {
        self.inner.identity()
    }
}

impl<V> std::fmt::Debug for ObservableVec<V>
where
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableVec")
            .field("name", &self.name())
            .field("items", &*self.inner.items.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Keyed collections
// ----------------------------------------------------------------------------

struct KeyedInner<K, V> {
    atom: Atom,
    entries: RwLock<IndexMap<K, V>>,
    listeners: Listeners<Change<K, V>>,
    /// Objects and maps report removals under different kinds.
    removal: fn(K, V) -> Change<K, V>,
}

impl<K, V> KeyedInner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(name: String, entries: IndexMap<K, V>, removal: fn(K, V) -> Change<K, V>) -> Self {
        Self {
            atom: Atom::new(name),
            entries: RwLock::new(entries),
            listeners: Listeners::new(),
            removal,
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        self.atom.report_observed();
        self.entries.read().get(key).cloned()
    }

    fn contains_key(&self, key: &K) -> bool {
        self.atom.report_observed();
        self.entries.read().contains_key(key)
    }

    fn keys(&self) -> Vec<K> {
        self.atom.report_observed();
        self.entries.read().keys().cloned().collect()
    }

    fn entries(&self) -> Vec<(K, V)> {
        self.atom.report_observed();
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn entries_untracked(&self) -> Vec<(K, V)> {
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn len(&self) -> usize {
        self.atom.report_observed();
        self.entries.read().len()
    }

    fn set(&self, key: K, value: V) {
        let previous = self.entries.write().insert(key.clone(), value.clone());
        let change = match previous {
            Some(old_value) => Change::Update {
                key,
                old_value,
                new_value: value,
            },
            None => Change::Add {
                key,
                new_value: value,
            },
        };
        self.notify(change);
    }

    fn delete(&self, key: &K) -> Option<V> {
        let (key, old_value) = self.entries.write().shift_remove_entry(key)?;
        self.notify((self.removal)(key, old_value.clone()));
        Some(old_value)
    }

    fn clear(&self) {
        let removed: Vec<(K, V)> = self.entries.write().drain(..).collect();
        if removed.is_empty() {
            return;
        }
        let _batch = Runtime::batch();
        for (key, old_value) in removed {
            self.notify((self.removal)(key, old_value));
        }
    }

    fn notify(&self, change: Change<K, V>) {
        let _batch = Runtime::batch();
        self.atom.report_changed();
        self.listeners.emit(&change);
    }
}

/// An observable, insertion-ordered map.
pub struct ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<KeyedInner<K, V>>,
}

impl<K, V> ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self::named("ObservableMap")
    }

    /// Create an empty map with a debug name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::from_entries(name, Vec::new())
    }

    /// Create a map from initial entries.
    pub fn from_entries(name: impl Into<String>, entries: Vec<(K, V)>) -> Self {
        Self {
            inner: Arc::new(KeyedInner::new(
                name.into(),
                entries.into_iter().collect(),
                |key, old_value| Change::Delete { key, old_value },
            )),
        }
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        self.inner.atom.name()
    }

    /// Value stored under `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key)
    }

    /// Whether `key` is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<K> {
        self.inner.keys()
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.inner.entries()
    }

    /// Entries in insertion order, without tracking the read.
    pub fn entries_untracked(&self) -> Vec<(K, V)> {
        self.inner.entries_untracked()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace the value under `key`.
    pub fn set(&self, key: K, value: V) {
        self.inner.set(key, value);
    }

    /// Remove `key`, returning its value.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.inner.delete(key)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Register a change listener.
    pub fn observe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&Change<K, V>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Whether two handles point at the same map.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<K, V> Default for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Identity for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn identity(&self) -> usize {
        self.inner.identity()
    }
}

impl<K, V> std::fmt::Debug for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableMap")
            .field("name", &self.name())
            .field("entries", &*self.inner.entries.read())
            .finish()
    }
}

/// An observable record with string keys.
///
/// Behaves like an [`ObservableMap`] keyed by `String`, except that removing
/// a property is reported as [`Change::Remove`].
pub struct ObservableObject<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<KeyedInner<String, V>>,
}

impl<V> ObservableObject<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create an empty object.
    pub fn new() -> Self {
        Self::from_entries(Vec::<(String, V)>::new())
    }

    /// Create an object from initial properties.
    pub fn from_entries<S: Into<String>>(entries: Vec<(S, V)>) -> Self {
        Self {
            inner: Arc::new(KeyedInner::new(
                "ObservableObject".to_string(),
                entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
                |key, old_value| Change::Remove { key, old_value },
            )),
        }
    }

    /// Value of property `key`.
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.get(&key.to_string())
    }

    /// Whether property `key` exists.
    pub fn has(&self, key: &str) -> bool {
        self.inner.contains_key(&key.to_string())
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    /// Properties in insertion order.
    pub fn entries(&self) -> Vec<(String, V)> {
        self.inner.entries()
    }

    /// Properties in insertion order, without tracking the read.
    pub fn entries_untracked(&self) -> Vec<(String, V)> {
        self.inner.entries_untracked()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the object has no properties.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add or overwrite property `key`.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.inner.set(key.into(), value);
    }

    /// Remove property `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.delete(&key.to_string())
    }

    /// Register a change listener.
    pub fn observe<F>(&self, listener: F) -> Disposer
    where
        F: Fn(&Change<String, V>) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(listener))
    }

    /// Number of registered change listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Whether two handles point at the same object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<V> Default for ObservableObject<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for ObservableObject<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Identity for ObservableObject<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn identity(&self) -> usize {
        self.inner.identity()
    }
}

impl<V> std::fmt::Debug for ObservableObject<V>
where
    V: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.inner.entries.read().iter())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::sync::atomic::AtomicUsize;

    fn recorder<K, V>() -> (
        Arc<Mutex<Vec<Change<K, V>>>>,
        impl Fn(&Change<K, V>) + Send + Sync + 'static,
    )
    where
        K: Clone + Send + 'static,
        V: Clone + Send + 'static,
    {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |change: &Change<K, V>| sink.lock().push(change.clone()))
    }

    #[test]
    fn splice_reports_spans_and_counts() {
        let vec = ObservableVec::new(vec![1, 2, 3, 4, 5]);
        let (log, listener) = recorder();
        let _d = vec.observe(listener);

        let removed = vec.splice(1, 2, vec![20, 30, 40]);

        assert_eq!(removed, vec![2, 3]);
        assert_eq!(vec.to_vec(), vec![1, 20, 30, 40, 4, 5]);
        assert_eq!(
            log.lock()[0],
            Change::Splice {
                index: 1,
                removed: vec![2, 3],
                added: vec![20, 30, 40],
                removed_count: 2,
                added_count: 3,
            }
        );
    }

    #[test]
    fn empty_splice_is_silent() {
        let vec = ObservableVec::new(vec![1]);
        let (log, listener) = recorder();
        let _d = vec.observe(listener);

        assert!(vec.splice(5, 3, Vec::new()).is_empty());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn set_reports_update_and_checks_bounds() {
        let vec = ObservableVec::new(vec!["a", "b"]);
        let (log, listener) = recorder();
        let _d = vec.observe(listener);

        vec.set(1, "c").unwrap();
        vec.set(2, "d").unwrap();
        assert_eq!(
            vec.set(5, "x"),
            Err(Error::IndexOutOfBounds { index: 5, len: 3 })
        );

        let log = log.lock();
        assert_eq!(
            log[0],
            Change::Update {
                key: 1,
                old_value: "b",
                new_value: "c"
            }
        );
        assert_eq!(log[1].kind(), ChangeKind::Splice);
    }

    #[test]
    fn move_item_shifts_elements() {
        let vec = ObservableVec::new(vec![1, 2, 3]);
        vec.move_item(0, 1).unwrap();
        assert_eq!(vec.to_vec(), vec![2, 1, 3]);

        vec.move_item(2, 0).unwrap();
        assert_eq!(vec.to_vec(), vec![3, 2, 1]);

        assert_eq!(
            vec.move_item(0, 3),
            Err(Error::IndexOutOfBounds { index: 3, len: 3 })
        );
    }

    #[test]
    fn map_reports_add_update_delete() {
        let map: ObservableMap<String, i32> = ObservableMap::new();
        let (log, listener) = recorder();
        let _d = map.observe(listener);

        map.set("a".into(), 1);
        map.set("a".into(), 2);
        assert_eq!(map.delete(&"a".to_string()), Some(2));
        assert_eq!(map.delete(&"a".to_string()), None);

        let kinds: Vec<ChangeKind> = log.lock().iter().map(Change::kind).collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Add, ChangeKind::Update, ChangeKind::Delete]
        );
    }

    #[test]
    fn empty_object_reports_added_property() {
        let object = ObservableObject::<i32>::new();
        assert!(object.is_empty());
        let (log, listener) = recorder();
        let _d = object.observe(listener);

        object.set("y", 2);
        assert_eq!(
            *log.lock(),
            vec![Change::Add {
                key: "y".to_string(),
                new_value: 2
            }]
        );
        assert_eq!(object.keys(), vec!["y".to_string()]);
    }

    #[test]
    fn object_reports_remove() {
        let object = ObservableObject::from_entries(vec![("x", 1)]);
        let (log, listener) = recorder();
        let _d = object.observe(listener);

        object.remove("x");
        assert_eq!(
            log.lock()[0],
            Change::Remove {
                key: "x".to_string(),
                old_value: 1
            }
        );
        assert!(!object.has("x"));
    }

    #[test]
    fn disposed_listener_stops_receiving() {
        let vec = ObservableVec::new(Vec::<i32>::new());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let disposer = vec.observe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        vec.push(1);
        disposer.dispose();
        vec.push(2);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(vec.listener_count(), 0);
    }

    #[test]
    fn reads_are_tracked() {
        let map: ObservableMap<&'static str, i32> = ObservableMap::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let m = map.clone();
        let r = runs.clone();
        let _effect = Effect::new(move || {
            m.get(&"k");
            r.fetch_add(1, Ordering::SeqCst);
        });

        map.set("k", 1);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clear_batches_effects() {
        let map = ObservableMap::from_entries("m", vec![(1, "a"), (2, "b"), (3, "c")]);
        let runs = Arc::new(AtomicUsize::new(0));

        let m = map.clone();
        let r = runs.clone();
        let _effect = Effect::new(move || {
            m.len();
            r.fetch_add(1, Ordering::SeqCst);
        });

        map.clear();
        assert!(map.is_empty());
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn changes_serialize_with_type_tag() {
        let change: Change<String, i32> = Change::Add {
            key: "a".into(),
            new_value: 1,
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "add");
        assert_eq!(json["new_value"], 1);
    }

    #[test]
    fn identity_follows_allocation() {
        let a = ObservableVec::new(vec![1]);
        let b = a.clone();
        let c = ObservableVec::new(vec![1]);

        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }
}
