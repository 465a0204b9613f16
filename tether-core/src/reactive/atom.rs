//! Atoms
//!
//! An atom is the unit of observable identity. It holds no value of its own;
//! data structures embed one and call [`Atom::report_observed`] on every read
//! and [`Atom::report_changed`] after every write.
//!
//! Atoms also tell their owner when they start and stop being observed, which
//! is what lazily-subscribed resources are built on.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::runtime::{Derivation, Observable, Runtime};
use super::subscriber::{ObservableId, SubscriberId};
use super::Disposer;

pub(crate) type Callback = Arc<dyn Fn() + Send + Sync>;

/// Observer bookkeeping shared by atoms and memos.
pub(crate) struct AtomCore {
    id: ObservableId,
    name: String,
    version: AtomicU64,
    /// Insertion ordered so observers are notified in registration order.
    observers: Mutex<IndexMap<SubscriberId, Weak<dyn Derivation>>>,
    /// Set on the first tracked read, cleared once unobservation settles.
    observed: AtomicBool,
    pending_unobservation: AtomicBool,
}

impl AtomCore {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            id: ObservableId::new(),
            name: name.into(),
            version: AtomicU64::new(0),
            observers: Mutex::new(IndexMap::new()),
            observed: AtomicBool::new(false),
            pending_unobservation: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> ObservableId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub(crate) fn bump_version(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }

    pub(crate) fn is_observed(&self) -> bool {
        self.observed.load(Ordering::SeqCst)
    }

    /// Mark as observed. Returns `true` on the unobserved -> observed edge.
    pub(crate) fn mark_observed(&self) -> bool {
        !self.observed.swap(true, Ordering::SeqCst)
    }

    /// Clear the observed flag. Returns `true` if it was set.
    pub(crate) fn mark_unobserved(&self) -> bool {
        self.observed.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn insert_observer(&self, id: SubscriberId, observer: Weak<dyn Derivation>) {
        self.observers.lock().insert(id, observer);
    }

    /// Remove an observer. Returns `true` if no observers remain and the
    /// caller should queue an unobservation check.
    pub(crate) fn take_observer(&self, id: SubscriberId) -> bool {
        let mut observers = self.observers.lock();
        observers.shift_remove(&id);
        observers.is_empty() && !self.pending_unobservation.swap(true, Ordering::SeqCst)
    }

    /// Request an unobservation check without removing anything.
    pub(crate) fn request_unobservation_check(&self) -> bool {
        self.observers.lock().is_empty() && !self.pending_unobservation.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn clear_pending_unobservation(&self) {
        self.pending_unobservation.store(false, Ordering::SeqCst);
    }

    /// Mark every live observer as maybe dirty.
    ///
    /// The observer list is copied out first so no lock is held while
    /// observers run their own propagation.
    pub(crate) fn notify_observers(&self) {
        let observers: Vec<Arc<dyn Derivation>> = {
            let mut observers = self.observers.lock();
            observers.retain(|_, weak| weak.strong_count() > 0);
            observers.values().filter_map(Weak::upgrade).collect()
        };
        for observer in observers {
            observer.mark_maybe_dirty();
        }
    }
}

struct AtomInner {
    core: AtomCore,
    on_observed: Mutex<Vec<(u64, Callback)>>,
    on_unobserved: Mutex<Vec<(u64, Callback)>>,
    next_listener: AtomicU64,
    weak_self: Weak<AtomInner>,
}

impl AtomInner {
    fn fire(list: &Mutex<Vec<(u64, Callback)>>) {
        let callbacks: Vec<Callback> = list.lock().iter().map(|(_, cb)| cb.clone()).collect();
        for callback in callbacks {
            callback();
        }
    }

    fn queue_check(&self) {
        if let Some(me) = self.weak_self.upgrade() {
            Runtime::queue_unobservation(me);
        }
    }
}

impl Observable for AtomInner {
    fn observable_id(&self) -> ObservableId {
        self.core.id()
    }

    fn version(&self) -> u64 {
        self.core.version()
    }

    fn refresh(&self) {}

    fn add_observer(&self, id: SubscriberId, observer: Weak<dyn Derivation>) {
        self.core.insert_observer(id, observer);
        if self.core.mark_observed() {
            Self::fire(&self.on_observed);
        }
    }

    fn remove_observer(&self, id: SubscriberId) {
        if self.core.take_observer(id) {
            self.queue_check();
        }
    }

    fn settle_unobserved(&self) {
        self.core.clear_pending_unobservation();
        if self.core.observer_count() == 0 && self.core.mark_unobserved() {
            tracing::debug!(atom = self.core.name(), "atom became unobserved");
            Self::fire(&self.on_unobserved);
        }
    }
}

/// A unit of observable identity with observed/unobserved notifications.
///
/// Cloning an `Atom` creates a new handle to the same atom.
#[derive(Clone)]
pub struct Atom {
    inner: Arc<AtomInner>,
}

impl Atom {
    /// Create a new atom.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new_cyclic(|weak_self| AtomInner {
                core: AtomCore::new(name),
                on_observed: Mutex::new(Vec::new()),
                on_unobserved: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                weak_self: weak_self.clone(),
            }),
        }
    }

    /// Create an atom with "became observed" and "became unobserved"
    /// callbacks.
    pub fn with_callbacks<O, U>(name: impl Into<String>, on_observed: O, on_unobserved: U) -> Self
    where
        O: Fn() + Send + Sync + 'static,
        U: Fn() + Send + Sync + 'static,
    {
        let atom = Self::new(name);
        let _ = atom.on_become_observed(on_observed);
        let _ = atom.on_become_unobserved(on_unobserved);
        atom
    }

    /// Get the atom's unique ID.
    pub fn id(&self) -> ObservableId {
        self.inner.core.id()
    }

    /// Debug name of the atom.
    pub fn name(&self) -> &str {
        self.inner.core.name()
    }

    /// Report that the atom was read.
    ///
    /// Returns `true` if the read happened inside a tracking context. The
    /// first tracked read fires the "became observed" callbacks before
    /// returning, so a subscriber that pushes a value synchronously is seen
    /// by the very read that started it.
    pub fn report_observed(&self) -> bool {
        if !ReactiveContext::is_active() {
            return false;
        }
        if self.inner.core.mark_observed() {
            Runtime::transaction(|| {
                AtomInner::fire(&self.inner.on_observed);
                // If the reading frame never binds (it is abandoned), the
                // batch end notices the atom has no observers.
                if self.inner.core.request_unobservation_check() {
                    self.inner.queue_check();
                }
            });
        }
        // Versions bumped by the callbacks above are already seen by this read.
        ReactiveContext::track_dependency(self.inner.clone(), self.inner.core.version())
    }

    /// Report that the atom changed.
    ///
    /// Observers are marked maybe dirty; effects run at the end of the
    /// outermost batch.
    pub fn report_changed(&self) {
        let _batch = Runtime::batch();
        self.inner.core.bump_version();
        self.inner.core.notify_observers();
    }

    /// Whether the atom currently has observers.
    pub fn is_observed(&self) -> bool {
        self.inner.core.is_observed()
    }

    /// Number of derivations observing this atom.
    pub fn observer_count(&self) -> usize {
        self.inner.core.observer_count()
    }

    /// Current version of the atom.
    pub fn version(&self) -> u64 {
        self.inner.core.version()
    }

    /// Register a callback fired when the atom becomes observed.
    pub fn on_become_observed<F>(&self, callback: F) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_listener(true, Arc::new(callback))
    }

    /// Register a callback fired when the atom becomes unobserved.
    pub fn on_become_unobserved<F>(&self, callback: F) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.add_listener(false, Arc::new(callback))
    }

    fn add_listener(&self, observed: bool, callback: Callback) -> Disposer {
        let key = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        if observed {
            self.inner.on_observed.lock().push((key, callback));
        } else {
            self.inner.on_unobserved.lock().push((key, callback));
        }

        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                let slot = if observed {
                    &inner.on_observed
                } else {
                    &inner.on_unobserved
                };
                slot.lock().retain(|(k, _)| *k != key);
            }
        })
    }
}

impl std::fmt::Debug for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("observers", &self.observer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::sync::atomic::AtomicI32;

    fn counting_atom() -> (Atom, Arc<AtomicI32>, Arc<AtomicI32>) {
        let observed = Arc::new(AtomicI32::new(0));
        let unobserved = Arc::new(AtomicI32::new(0));
        let o = observed.clone();
        let u = unobserved.clone();
        let atom = Atom::with_callbacks(
            "test",
            move || {
                o.fetch_add(1, Ordering::SeqCst);
            },
            move || {
                u.fetch_add(1, Ordering::SeqCst);
            },
        );
        (atom, observed, unobserved)
    }

    #[test]
    fn untracked_read_does_not_observe() {
        let (atom, observed, _) = counting_atom();

        assert!(!atom.report_observed());
        assert_eq!(observed.load(Ordering::SeqCst), 0);
        assert!(!atom.is_observed());
    }

    #[test]
    fn observed_and_unobserved_fire_once_per_activation() {
        let (atom, observed, unobserved) = counting_atom();

        let a = atom.clone();
        let effect = Effect::new(move || {
            a.report_observed();
        });
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(atom.observer_count(), 1);

        // Re-running the effect keeps the atom observed.
        atom.report_changed();
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(unobserved.load(Ordering::SeqCst), 0);

        effect.dispose();
        assert_eq!(unobserved.load(Ordering::SeqCst), 1);
        assert!(!atom.is_observed());

        effect.dispose();
        assert_eq!(unobserved.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn report_changed_reruns_observers() {
        let atom = Atom::new("trigger");
        let runs = Arc::new(AtomicI32::new(0));

        let a = atom.clone();
        let r = runs.clone();
        let _effect = Effect::new(move || {
            a.report_observed();
            r.fetch_add(1, Ordering::SeqCst);
        });

        atom.report_changed();
        atom.report_changed();
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn listener_disposer_removes_callback() {
        let atom = Atom::new("listeners");
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        let disposer = atom.on_become_observed(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        disposer.dispose();

        let a = atom.clone();
        let _effect = Effect::new(move || {
            a.report_observed();
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
