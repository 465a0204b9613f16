//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is marked maybe dirty and
//!    queued on the runtime. Queued effects run at the end of the outermost
//!    batch.
//!
//! 3. Before re-running, the effect checks whether any dependency actually
//!    moved to a new version. If none did (say a memo recomputed to the same
//!    value), the run is skipped.
//!
//! 4. Each run records a fresh dependency set; the runtime links new
//!    dependencies and unlinks stale ones.
//!
//! # Differences from Memo
//!
//! - Memos return a value; effects do not.
//! - Memos are lazy (compute on access); effects are eager (run when deps change).
//! - Memos cache results; effects just run their side effect.
//!
//! # Lifetime
//!
//! An effect lives while a handle to it exists, or until [`Effect::dispose`]
//! is called. [`Effect::detach`] trades the handle for a [`Disposer`] and
//! keeps the effect running until that disposer is called.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::runtime::{
    bind_dependencies, clear_dependencies, should_compute, Dependency, Derivation,
    DerivationState, Runtime,
};
use super::subscriber::SubscriberId;
use super::Disposer;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique effect ID.
fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct EffectInner {
    id: u64,
    subscriber_id: SubscriberId,
    run: Box<dyn Fn() + Send + Sync>,
    dependencies: Mutex<Vec<Dependency>>,
    state: Mutex<DerivationState>,
    scheduled: AtomicBool,
    disposed: AtomicBool,
    run_count: AtomicUsize,
    /// Strong self reference held by detached effects.
    pinned: Mutex<Option<Arc<EffectInner>>>,
    weak_self: Weak<EffectInner>,
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let _batch = Runtime::batch();
        *self.state.lock() = DerivationState::Clean;

        let dependencies;
        {
            let _ctx = ReactiveContext::enter(self.subscriber_id);
            (self.run)();
            dependencies = ReactiveContext::take_dependencies();
        }

        // Disposed from inside its own body: do not resubscribe.
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let weak: Weak<dyn Derivation> = self.weak_self.clone();
        bind_dependencies(self.subscriber_id, weak, &self.dependencies, dependencies);
        self.run_count.fetch_add(1, Ordering::SeqCst);
    }

    fn schedule(&self) {
        if self.disposed.load(Ordering::SeqCst) || self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(me) = self.weak_self.upgrade() {
            Runtime::schedule_reaction(me);
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        clear_dependencies(self.subscriber_id, &self.dependencies);
        let pinned = self.pinned.lock().take();
        drop(pinned);
    }
}

impl Derivation for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn mark_maybe_dirty(&self) {
        {
            let mut state = self.state.lock();
            if *state == DerivationState::Clean {
                *state = DerivationState::MaybeDirty;
            }
        }
        self.schedule();
    }

    fn run_scheduled(&self) {
        self.scheduled.store(false, Ordering::SeqCst);
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let state = *self.state.lock();
        let dependencies = self.dependencies.lock().clone();
        if should_compute(state, &dependencies) {
            self.execute();
        } else {
            *self.state.lock() = DerivationState::Clean;
        }
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        let dependencies = std::mem::take(&mut *self.dependencies.lock());
        for dep in dependencies {
            dep.observable.remove_observer(self.subscriber_id);
        }
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
/// use tether_core::reactive::{Effect, Signal};
///
/// let count = Signal::new(0);
/// let seen = Arc::new(AtomicI32::new(-1));
///
/// let c = count.clone();
/// let s = seen.clone();
/// let _effect = Effect::new(move || s.store(c.get(), Ordering::SeqCst));
///
/// count.set(5);
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);
        effect.execute();
        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// Useful for cases where you want to control when the effect first runs.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new_cyclic(|weak_self| EffectInner {
                id: next_effect_id(),
                subscriber_id: SubscriberId::new(),
                run: Box::new(run),
                dependencies: Mutex::new(Vec::new()),
                state: Mutex::new(DerivationState::Dirty),
                scheduled: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
                pinned: Mutex::new(None),
                weak_self: weak_self.clone(),
            }),
        }
    }

    /// Track `expression` and run `effect` with its value whenever it changes.
    ///
    /// The effect body runs untracked inside an action boundary, so whatever
    /// it reads or writes does not feed back into the expression's
    /// dependencies. With `fire_immediately` the effect also runs for the
    /// first value.
    pub fn reaction<T, E, F>(expression: E, effect: F, fire_immediately: bool) -> Self
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        E: Fn() -> T + Send + Sync + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let previous: Mutex<Option<T>> = Mutex::new(None);
        Self::new(move || {
            let value = expression();
            let fire = {
                let mut previous = previous.lock();
                let fire = match previous.as_ref() {
                    None => fire_immediately,
                    Some(old) => *old != value,
                };
                *previous = Some(value.clone());
                fire
            };
            if fire {
                Runtime::run_in_action("reaction", || effect(&value));
            }
        })
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the subscriber ID for this effect.
    pub fn subscriber_id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Execute the effect function now, regardless of dirty state.
    ///
    /// This runs the function within a reactive context to track dependencies.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Schedule the effect to re-run.
    ///
    /// Outside a batch the effect runs before this returns; inside one it
    /// runs when the outermost batch ends.
    pub fn schedule(&self) {
        *self.inner.state.lock() = DerivationState::Dirty;
        self.inner.schedule();
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again and holds no
    /// dependencies. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Keep the effect running without a handle.
    ///
    /// The returned disposer is the only way to stop it.
    pub fn detach(self) -> Disposer {
        *self.inner.pinned.lock() = Some(self.inner.clone());
        let inner = self.inner;
        Disposer::new(move || inner.dispose())
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.lock().len()
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
