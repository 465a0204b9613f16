//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects atoms, memos, and
//! effects. It owns the batching state and schedules updates when observables
//! change.
//!
//! # How It Works
//!
//! 1. When a derivation (memo or effect) reads an observable inside its
//!    tracking context, the observable is recorded together with the version
//!    that was read.
//!
//! 2. After the derivation finishes, its dependency set is diffed against the
//!    previous one and observers are added or removed accordingly.
//!
//! 3. When an observable changes, the runtime:
//!    a. Bumps its version
//!    b. Marks all observers as "maybe dirty" (memos propagate further)
//!    c. Schedules effects for execution at the end of the outermost batch
//!    d. Memos are lazy - they recompute on next access
//!
//! 4. A "maybe dirty" derivation refreshes its dependencies and re-runs only
//!    if one of them reports a version different from the one it read.
//!
//! 5. When an observable loses its last observer, it is queued; at the end of
//!    the outermost batch it is told it became unobserved if it is still
//!    without observers.
//!
//! # Threading
//!
//! Batching state lives in thread-local storage, like the context stack. The
//! handles themselves are `Send + Sync` so they can be moved into tasks that
//! run on the same (current-thread) executor.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::context::ReactiveContext;
use super::subscriber::{ObservableId, SubscriberId};

/// Upper bound on reaction passes before the runtime gives up on a cycle.
const MAX_REACTION_ITERATIONS: usize = 100;

/// Something that can be depended upon.
pub(crate) trait Observable: Send + Sync {
    /// Identity of this observable.
    fn observable_id(&self) -> ObservableId;

    /// Current version. Bumped whenever the observable value changes.
    fn version(&self) -> u64;

    /// Bring the value up to date. Memos recompute here when stale.
    fn refresh(&self);

    /// Register a derivation as an observer.
    fn add_observer(&self, id: SubscriberId, observer: Weak<dyn Derivation>);

    /// Remove a derivation from the observers.
    fn remove_observer(&self, id: SubscriberId);

    /// Called at the end of the outermost batch for observables that were
    /// queued because they lost their last observer.
    fn settle_unobserved(&self);
}

/// A computation that depends on observables.
pub(crate) trait Derivation: Send + Sync {
    /// Get the subscriber ID for this derivation.
    fn subscriber_id(&self) -> SubscriberId;

    /// Mark this derivation as potentially needing an update.
    fn mark_maybe_dirty(&self);

    /// Run a scheduled reaction (effects only).
    fn run_scheduled(&self);
}

/// A recorded read: the observable and the version that was seen.
#[derive(Clone)]
pub(crate) struct Dependency {
    pub(crate) observable: Arc<dyn Observable>,
    pub(crate) version: u64,
}

/// Dirty state for a derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationState {
    /// The cached result is up-to-date.
    Clean,

    /// A dependency might have changed. Need to check.
    MaybeDirty,

    /// The derivation definitely needs to run (never ran, or was suspended).
    Dirty,
}

/// Decide whether a derivation must re-run.
///
/// For "maybe dirty" derivations each dependency is refreshed in order and
/// its version compared with the one recorded at read time.
pub(crate) fn should_compute(state: DerivationState, dependencies: &[Dependency]) -> bool {
    match state {
        DerivationState::Clean => false,
        DerivationState::Dirty => true,
        DerivationState::MaybeDirty => dependencies.iter().any(|dep| {
            dep.observable.refresh();
            dep.observable.version() != dep.version
        }),
    }
}

/// Replace the dependency set of a derivation and update observer links.
///
/// New dependencies are linked before stale ones are unlinked so that an
/// observable read in both runs never sees a transient zero-observer state.
pub(crate) fn bind_dependencies(
    id: SubscriberId,
    observer: Weak<dyn Derivation>,
    slot: &Mutex<Vec<Dependency>>,
    new_dependencies: Vec<Dependency>,
) {
    let _batch = Runtime::batch();
    let old = std::mem::replace(&mut *slot.lock(), new_dependencies.clone());

    let old_ids: HashSet<ObservableId> =
        old.iter().map(|dep| dep.observable.observable_id()).collect();
    let new_ids: HashSet<ObservableId> = new_dependencies
        .iter()
        .map(|dep| dep.observable.observable_id())
        .collect();

    for dep in &new_dependencies {
        if !old_ids.contains(&dep.observable.observable_id()) {
            dep.observable.add_observer(id, observer.clone());
        }
    }
    for dep in &old {
        if !new_ids.contains(&dep.observable.observable_id()) {
            dep.observable.remove_observer(id);
        }
    }
}

/// Unlink a derivation from every dependency it holds.
pub(crate) fn clear_dependencies(id: SubscriberId, slot: &Mutex<Vec<Dependency>>) {
    let old = std::mem::take(&mut *slot.lock());
    if old.is_empty() {
        return;
    }
    let _batch = Runtime::batch();
    for dep in &old {
        dep.observable.remove_observer(id);
    }
}

#[derive(Default)]
struct RuntimeState {
    batch_depth: usize,
    running_reactions: bool,
    pending_reactions: Vec<Arc<dyn Derivation>>,
    pending_unobservations: Vec<Arc<dyn Observable>>,
    next_action_id: u64,
}

thread_local! {
    static RUNTIME: RefCell<RuntimeState> = RefCell::new(RuntimeState::default());
}

/// The reactive runtime.
///
/// A zero-sized entry point to the thread's batching and action state.
pub struct Runtime;

impl Runtime {
    /// Open a batch that closes when the returned guard is dropped.
    pub fn batch() -> BatchGuard {
        Self::start_batch();
        BatchGuard { _private: () }
    }

    /// Run `f` inside a transaction.
    ///
    /// Effects scheduled by mutations inside `f` run once, after the
    /// outermost transaction completes.
    pub fn transaction<R>(f: impl FnOnce() -> R) -> R {
        let _batch = Self::batch();
        f()
    }

    /// Run `f` without tracking any reads.
    pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
        let _ctx = ReactiveContext::untracked();
        f()
    }

    /// Check if reads are currently being tracked by a derivation.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    /// Check if a batch is open on this thread.
    pub fn in_batch() -> bool {
        RUNTIME
            .try_with(|rt| rt.borrow().batch_depth > 0)
            .unwrap_or(false)
    }

    /// Begin an action boundary.
    ///
    /// An action is an untracked batch: reads inside it do not become
    /// dependencies and reactions wait until the boundary ends.
    pub fn start_action(name: &str) -> ActionRunInfo {
        Self::start_batch();
        let id = RUNTIME
            .try_with(|rt| {
                let mut rt = rt.borrow_mut();
                rt.next_action_id += 1;
                rt.next_action_id
            })
            .unwrap_or(0);
        tracing::trace!(action = name, id, "action started");
        ActionRunInfo {
            id,
            name: name.to_string(),
            context: Some(ReactiveContext::untracked()),
            failed: false,
        }
    }

    /// End an action boundary started by [`Runtime::start_action`].
    pub fn end_action(mut info: ActionRunInfo) {
        info.context.take();
        tracing::trace!(
            action = %info.name,
            id = info.id,
            failed = info.failed,
            "action ended"
        );
        Self::end_batch();
    }

    /// Run `f` inside an action boundary named `name`.
    pub fn run_in_action<R>(name: &str, f: impl FnOnce() -> R) -> R {
        let info = Self::start_action(name);
        let guard = ActionGuard(Some(info));
        let result = f();
        drop(guard);
        result
    }

    pub(crate) fn start_batch() {
        let _ = RUNTIME.try_with(|rt| rt.borrow_mut().batch_depth += 1);
    }

    pub(crate) fn end_batch() {
        let outermost = RUNTIME
            .try_with(|rt| {
                let mut rt = rt.borrow_mut();
                rt.batch_depth = rt.batch_depth.saturating_sub(1);
                rt.batch_depth == 0
            })
            .unwrap_or(false);
        if outermost {
            Self::flush();
        }
    }

    /// Queue an effect for execution.
    pub(crate) fn schedule_reaction(reaction: Arc<dyn Derivation>) {
        let idle = RUNTIME
            .try_with(|rt| {
                let mut rt = rt.borrow_mut();
                rt.pending_reactions.push(reaction);
                rt.batch_depth == 0
            })
            .unwrap_or(false);
        if idle {
            Self::flush();
        }
    }

    /// Queue an observable that just lost its last observer.
    pub(crate) fn queue_unobservation(observable: Arc<dyn Observable>) {
        let idle = RUNTIME
            .try_with(|rt| {
                let mut rt = rt.borrow_mut();
                rt.pending_unobservations.push(observable);
                rt.batch_depth == 0
            })
            .unwrap_or(false);
        if idle {
            Self::flush();
        }
    }

    /// Run pending reactions, then settle pending unobservations, until
    /// neither queue has work left.
    fn flush() {
        loop {
            Self::run_reactions();

            let pending = RUNTIME
                .try_with(|rt| {
                    let mut rt = rt.borrow_mut();
                    if rt.batch_depth > 0 {
                        return Vec::new();
                    }
                    std::mem::take(&mut rt.pending_unobservations)
                })
                .unwrap_or_default();
            if pending.is_empty() {
                return;
            }

            Self::start_batch();
            for observable in pending {
                observable.settle_unobserved();
            }
            // Nested end_batch does not flush: depth returns to zero only here.
            let _ = RUNTIME.try_with(|rt| {
                let mut rt = rt.borrow_mut();
                rt.batch_depth = rt.batch_depth.saturating_sub(1);
            });
        }
    }

    fn run_reactions() {
        let may_run = RUNTIME
            .try_with(|rt| {
                let mut rt = rt.borrow_mut();
                if rt.running_reactions || rt.batch_depth > 0 {
                    return false;
                }
                rt.running_reactions = true;
                true
            })
            .unwrap_or(false);
        if !may_run {
            return;
        }

        let mut iterations = 0;
        loop {
            let batch = RUNTIME
                .try_with(|rt| std::mem::take(&mut rt.borrow_mut().pending_reactions))
                .unwrap_or_default();
            if batch.is_empty() {
                break;
            }
            iterations += 1;
            if iterations > MAX_REACTION_ITERATIONS {
                tracing::error!(
                    iterations,
                    "reactions did not converge; dropping the remaining queue"
                );
                break;
            }
            for reaction in batch {
                reaction.run_scheduled();
            }
        }

        let _ = RUNTIME.try_with(|rt| rt.borrow_mut().running_reactions = false);
    }
}

/// Closes a batch when dropped.
pub struct BatchGuard {
    _private: (),
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let _ = RUNTIME.try_with(|rt| {
                let mut rt = rt.borrow_mut();
                rt.batch_depth = rt.batch_depth.saturating_sub(1);
            });
        } else {
            Runtime::end_batch();
        }
    }
}

/// Bookkeeping for an open action boundary.
pub struct ActionRunInfo {
    id: u64,
    name: String,
    context: Option<ReactiveContext>,
    failed: bool,
}

impl ActionRunInfo {
    /// Unique id of this boundary.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Name the boundary was opened with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record that the code run inside this boundary failed.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }
}

impl std::fmt::Debug for ActionRunInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRunInfo")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("failed", &self.failed)
            .finish()
    }
}

struct ActionGuard(Option<ActionRunInfo>);

impl Drop for ActionGuard {
    fn drop(&mut self) {
        if let Some(mut info) = self.0.take() {
            if std::thread::panicking() {
                info.mark_failed();
                info.context.take();
                let _ = RUNTIME.try_with(|rt| {
                    let mut rt = rt.borrow_mut();
                    rt.batch_depth = rt.batch_depth.saturating_sub(1);
                });
            } else {
                Runtime::end_action(info);
            }
        }
    }
}
