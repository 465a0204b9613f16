//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On first tracked access, the memo runs its computation inside a
//!    tracking context and caches the result.
//!
//! 2. When accessed again, if no dependencies have changed, returns cached value.
//!
//! 3. When a dependency changes, the memo is marked "maybe dirty" and passes
//!    that mark on to its own observers.
//!
//! 4. On next access, the memo refreshes its dependencies and compares their
//!    versions with the ones it read.
//!
//! 5. If any version moved, recompute. Otherwise, mark clean and return cache.
//!
//! # Observation Lifetime
//!
//! A memo caches only while something observes it. When it loses its last
//! observer it suspends: the cached value and its own dependencies are
//! dropped and the `on_become_unobserved` hooks run. Read outside a tracking
//! context while unobserved, it simply computes (nothing would keep the
//! cache fresh). `keep_alive` opts out of both behaviours.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::atom::{AtomCore, Callback};
use super::context::ReactiveContext;
use super::runtime::{
    bind_dependencies, clear_dependencies, should_compute, Dependency, Derivation,
    DerivationState, Observable, Runtime,
};
use super::subscriber::{ObservableId, SubscriberId};
use super::Disposer;

/// Counter for generating unique memo IDs.
static MEMO_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique memo ID.
fn next_memo_id() -> u64 {
    MEMO_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Construction options for a [`Memo`].
#[derive(Debug, Clone, Default)]
pub struct MemoOptions {
    /// Debug name.
    pub name: Option<String>,
    /// Keep the memo cached and subscribed even when nothing observes it.
    pub keep_alive: bool,
}

struct MemoInner<T> {
    id: u64,
    subscriber_id: SubscriberId,
    core: AtomCore,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: Mutex<Option<T>>,
    state: Mutex<DerivationState>,
    dependencies: Mutex<Vec<Dependency>>,
    keep_alive: bool,
    on_unobserved: Mutex<Vec<(u64, Callback)>>,
    next_listener: AtomicU64,
    weak_self: Weak<MemoInner<T>>,
}

impl<T> MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn weak_derivation(&self) -> Weak<dyn Derivation> {
        self.weak_self.clone()
    }

    fn needs_compute(&self) -> bool {
        if self.value.lock().is_none() {
            return true;
        }
        let state = *self.state.lock();
        let dependencies = self.dependencies.lock().clone();
        should_compute(state, &dependencies)
    }

    fn refresh_value(&self) {
        if self.needs_compute() {
            self.recompute();
        } else {
            *self.state.lock() = DerivationState::Clean;
        }
    }

    fn recompute(&self) {
        let _batch = Runtime::batch();
        *self.state.lock() = DerivationState::Clean;

        let new_value;
        let dependencies;
        {
            let _ctx = ReactiveContext::enter(self.subscriber_id);
            new_value = (self.compute)();
            dependencies = ReactiveContext::take_dependencies();
        }
        bind_dependencies(
            self.subscriber_id,
            self.weak_derivation(),
            &self.dependencies,
            dependencies,
        );

        let changed = {
            let mut value = self.value.lock();
            let changed = value.as_ref() != Some(&new_value);
            *value = Some(new_value);
            changed
        };
        if changed {
            self.core.bump_version();
        }
    }

    fn cached(&self) -> Option<T> {
        self.value.lock().clone()
    }

    fn suspend(&self) {
        clear_dependencies(self.subscriber_id, &self.dependencies);
        *self.value.lock() = None;
        *self.state.lock() = DerivationState::Dirty;
    }
}

impl<T> Observable for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn observable_id(&self) -> ObservableId {
        self.core.id()
    }

    fn version(&self) -> u64 {
        self.core.version()
    }

    fn refresh(&self) {
        self.refresh_value();
    }

    fn add_observer(&self, id: SubscriberId, observer: Weak<dyn Derivation>) {
        self.core.insert_observer(id, observer);
        self.core.mark_observed();
    }

    fn remove_observer(&self, id: SubscriberId) {
        if self.core.take_observer(id) {
            if let Some(me) = self.weak_self.upgrade() {
                Runtime::queue_unobservation(me);
            }
        }
    }

    fn settle_unobserved(&self) {
        self.core.clear_pending_unobservation();
        if self.core.observer_count() > 0 || self.keep_alive {
            return;
        }
        let was_observed = self.core.mark_unobserved();
        self.suspend();
        if was_observed {
            tracing::debug!(memo = self.core.name(), "memo became unobserved");
            let callbacks: Vec<Callback> = self
                .on_unobserved
                .lock()
                .iter()
                .map(|(_, cb)| cb.clone())
                .collect();
            for callback in callbacks {
                callback();
            }
        }
    }
}

impl<T> Derivation for MemoInner<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {
        let propagate = {
            let mut state = self.state.lock();
            if *state == DerivationState::Clean {
                *state = DerivationState::MaybeDirty;
                true
            } else {
                false
            }
        };
        if propagate {
            self.core.notify_observers();
        }
    }

    fn run_scheduled(&self) {}
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for dep in dependencies {
            dep.observable.remove_observer(self.subscriber_id);
        }
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The type of the computed value. Must be Clone + Send + Sync + PartialEq.
///
/// The PartialEq bound is needed to detect when the computed value actually
/// changed (some memos might return the same value even if inputs changed),
/// in which case observers are not re-run.
pub struct Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: Arc<MemoInner<T>>,
}

impl<T> Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Create a new memo with the given computation function.
    ///
    /// The computation is not run immediately. It runs on first access.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_options(compute, MemoOptions::default())
    }

    /// Create a new memo with explicit options.
    pub fn with_options<F>(compute: F, options: MemoOptions) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let name = options.name.unwrap_or_else(|| "Memo".to_string());
        Self {
            inner: Arc::new_cyclic(|weak_self| MemoInner {
                id: next_memo_id(),
                subscriber_id: SubscriberId::new(),
                core: AtomCore::new(name),
                compute: Box::new(compute),
                value: Mutex::new(None),
                state: Mutex::new(DerivationState::Dirty),
                dependencies: Mutex::new(Vec::new()),
                keep_alive: options.keep_alive,
                on_unobserved: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                weak_self: weak_self.clone(),
            }),
        }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Identity of the memo as an observable.
    pub fn observable_id(&self) -> ObservableId {
        self.inner.core.id()
    }

    /// Get the subscriber ID for this memo.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        self.inner.core.name()
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// This is the main entry point for reading a memo's value.
    pub fn get(&self) -> T {
        let inner = &self.inner;

        if ReactiveContext::is_active() {
            let _batch = Runtime::batch();
            inner.refresh_value();
            if let Some(value) = inner.cached() {
                ReactiveContext::track_dependency(inner.clone(), inner.core.version());
                // A frame that never binds leaves the memo without observers.
                if !inner.keep_alive && inner.core.request_unobservation_check() {
                    Runtime::queue_unobservation(inner.clone());
                }
                return value;
            }
        } else if inner.keep_alive || inner.core.observer_count() > 0 {
            inner.refresh_value();
            if let Some(value) = inner.cached() {
                return value;
            }
        }

        // Unobserved and untracked: nothing would keep a cache fresh.
        Runtime::untracked(|| (inner.compute)())
    }

    /// Mark the memo as potentially needing recomputation.
    pub fn mark_maybe_dirty(&self) {
        Derivation::mark_maybe_dirty(&*self.inner);
    }

    /// Mark the memo as definitely needing recomputation.
    pub fn mark_dirty(&self) {
        *self.inner.state.lock() = DerivationState::Dirty;
        self.inner.core.notify_observers();
    }

    /// Register a hook that runs when the memo becomes unobserved.
    pub fn on_become_unobserved<F>(&self, callback: F) -> Disposer
    where
        F: Fn() + Send + Sync + 'static,
    {
        let key = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        self.inner
            .on_unobserved
            .lock()
            .push((key, Arc::new(callback)));

        let weak = Arc::downgrade(&self.inner);
        Disposer::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.on_unobserved.lock().retain(|(k, _)| *k != key);
            }
        })
    }

    /// Get the current dirty state.
    pub fn state(&self) -> DerivationState {
        *self.inner.state.lock()
    }

    /// Get the number of dependents.
    pub fn dependent_count(&self) -> usize {
        self.inner.core.observer_count()
    }

    /// Get the number of dependencies recorded by the last computation.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.lock().is_some()
    }

    /// Whether the memo is kept alive regardless of observation.
    pub fn is_keep_alive(&self) -> bool {
        self.inner.keep_alive
    }

    /// Whether two handles point at the same memo.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Clone for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Memo<T>
where
    T: Clone + Send + Sync + PartialEq + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Signal};
    use std::sync::atomic::AtomicI32;

    fn counted<F>(count: &Arc<AtomicI32>, f: F) -> impl Fn() -> i32 + Send + Sync + 'static
    where
        F: Fn() -> i32 + Send + Sync + 'static,
    {
        let count = count.clone();
        move || {
            count.fetch_add(1, Ordering::SeqCst);
            f()
        }
    }

    #[test]
    fn untracked_unobserved_reads_recompute() {
        let call_count = Arc::new(AtomicI32::new(0));
        let memo = Memo::new(counted(&call_count, || 42));

        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
        assert!(!memo.has_value());
    }

    #[test]
    fn memo_caches_value_while_observed() {
        let call_count = Arc::new(AtomicI32::new(0));
        let memo = Memo::new(counted(&call_count, || 42));

        let m = memo.clone();
        let _effect = Effect::new(move || {
            m.get();
        });
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // Reads outside the effect use the cache
        assert_eq!(memo.get(), 42);
        assert_eq!(memo.get(), 42);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(memo.state(), DerivationState::Clean);
    }

    #[test]
    fn memo_recomputes_when_dependency_changes() {
        let signal = Signal::new(2);
        let call_count = Arc::new(AtomicI32::new(0));
        let s = signal.clone();
        let memo = Memo::new(counted(&call_count, move || s.get() * 10));

        let m = memo.clone();
        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        let _effect = Effect::new(move || {
            seen_clone.store(m.get(), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 20);

        signal.set(3);
        assert_eq!(seen.load(Ordering::SeqCst), 30);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unchanged_memo_value_does_not_rerun_observers() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let parity = Memo::new(move || s.get() % 2);

        let runs = Arc::new(AtomicI32::new(0));
        let p = parity.clone();
        let r = runs.clone();
        let _effect = Effect::new(move || {
            p.get();
            r.fetch_add(1, Ordering::SeqCst);
        });

        signal.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        signal.set(4);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn memo_suspends_when_unobserved() {
        let signal = Signal::new(1);
        let s = signal.clone();
        let memo = Memo::new(move || s.get() + 1);

        let unobserved = Arc::new(AtomicI32::new(0));
        let u = unobserved.clone();
        let _hook = memo.on_become_unobserved(move || {
            u.fetch_add(1, Ordering::SeqCst);
        });

        let m = memo.clone();
        let effect = Effect::new(move || {
            m.get();
        });
        assert!(memo.has_value());
        assert_eq!(signal.observer_count(), 1);

        effect.dispose();
        assert_eq!(unobserved.load(Ordering::SeqCst), 1);
        assert!(!memo.has_value());
        assert_eq!(memo.dependency_count(), 0);
        assert_eq!(signal.observer_count(), 0);
    }

    #[test]
    fn keep_alive_memo_stays_cached() {
        let call_count = Arc::new(AtomicI32::new(0));
        let signal = Signal::new(5);
        let s = signal.clone();
        let memo = Memo::with_options(
            counted(&call_count, move || s.get()),
            MemoOptions {
                keep_alive: true,
                ..MemoOptions::default()
            },
        );

        assert_eq!(memo.get(), 5);
        assert_eq!(memo.get(), 5);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        signal.set(6);
        assert_eq!(memo.get(), 6);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn memo_depends_on_memo() {
        let base = Signal::new(5);
        let b = base.clone();
        let doubled = Memo::new(move || b.get() * 2);
        let d = doubled.clone();
        let plus_ten = Memo::new(move || d.get() + 10);

        let seen = Arc::new(AtomicI32::new(0));
        let p = plus_ten.clone();
        let seen_clone = seen.clone();
        let _effect = Effect::new(move || {
            seen_clone.store(p.get(), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 20);

        base.set(10);
        assert_eq!(seen.load(Ordering::SeqCst), 30);
        assert_eq!(doubled.get(), 20);
    }

    #[test]
    fn memo_clone_shares_state() {
        let memo1 = Memo::new(|| 42);
        let memo2 = memo1.clone();

        assert_eq!(memo1.id(), memo2.id());
        assert!(memo1.ptr_eq(&memo2));

        memo1.mark_dirty();
        assert_eq!(memo2.state(), DerivationState::Dirty);
    }
}
