//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when an observable is read,
//! we can register the current computation as a dependent.
//!
//! # Implementation
//!
//! We use a thread-local stack to track the currently executing computation.
//! When entering a reactive context (e.g., running a memo or effect), we push
//! a tracking frame onto the stack. When the computation completes, we pop it.
//!
//! Untracked frames shadow any tracking frame below them. Action boundaries
//! and reaction bodies push one so that the state they read does not become
//! a dependency of whatever derivation happens to be running.

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use super::runtime::{Dependency, Observable};
use super::SubscriberId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
    static NEXT_FRAME: Cell<u64> = Cell::new(0);
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// Token used to verify that frames are popped in order.
    frame: u64,
    /// The subscriber being tracked, or `None` for an untracked frame.
    subscriber_id: Option<SubscriberId>,
    /// Observables read during this computation, with the version seen.
    dependencies: Vec<Dependency>,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub struct ReactiveContext {
    frame: u64,
}

impl ReactiveContext {
    /// Enter a new tracking context for the given subscriber.
    ///
    /// While this context is active, any observables that are read will be
    /// recorded as dependencies of the subscriber.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id))
    }

    /// Enter an untracked context.
    ///
    /// Reads performed while this guard is alive are not recorded, even if a
    /// tracking context is active further down the stack.
    pub fn untracked() -> Self {
        Self::push(None)
    }

    fn push(subscriber_id: Option<SubscriberId>) -> Self {
        let frame = NEXT_FRAME.with(|next| {
            let frame = next.get();
            next.set(frame + 1);
            frame
        });
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                frame,
                subscriber_id,
                dependencies: Vec::new(),
            });
        });
        Self { frame }
    }

    /// Check if reads are currently being tracked.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the subscriber currently being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK
            .try_with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber_id))
            .ok()
            .flatten()
    }

    /// Record a dependency on the given observable.
    ///
    /// Returns `false` when no tracking context is active. Repeated reads of
    /// the same observable within one frame are recorded once, keeping the
    /// version seen on the first read.
    pub(crate) fn track_dependency(observable: Arc<dyn Observable>, version: u64) -> bool {
        CONTEXT_STACK
            .try_with(|stack| {
                let mut stack = stack.borrow_mut();
                let Some(entry) = stack.last_mut() else {
                    return false;
                };
                if entry.subscriber_id.is_none() {
                    return false;
                }
                let id = observable.observable_id();
                if !entry
                    .dependencies
                    .iter()
                    .any(|dep| dep.observable.observable_id() == id)
                {
                    entry.dependencies.push(Dependency {
                        observable,
                        version,
                    });
                }
                true
            })
            .unwrap_or(false)
    }

    /// Take the dependencies collected in the current frame.
    pub(crate) fn take_dependencies() -> Vec<Dependency> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|entry| std::mem::take(&mut entry.dependencies))
                .unwrap_or_default()
        })
    }

    /// Number of dependencies collected so far in the current frame.
    pub fn dependency_count() -> usize {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|entry| entry.dependencies.len())
                .unwrap_or(0)
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        let _ = CONTEXT_STACK.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            // Frames are released in reverse order, except for the boundary
            // of an async action dropped while suspended.
            if stack.last().map(|entry| entry.frame) == Some(self.frame) {
                stack.pop();
            } else if let Some(pos) = stack.iter().rposition(|entry| entry.frame == self.frame) {
                stack.remove(pos);
            }
        });
    }
}
