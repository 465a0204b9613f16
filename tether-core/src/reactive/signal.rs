//! Signal Implementation
//!
//! A Signal is the basic observable box. It pairs an [`Atom`] with a value:
//! reads report the atom observed, writes report it changed.
//!
//! # Thread Safety
//!
//! The value is protected by a RwLock so handles can be shared with tasks.
//! Change propagation itself is driven by the thread that performs the write.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::atom::Atom;
use super::subscriber::ObservableId;

/// A reactive signal holding a value of type T.
///
/// # Example
///
/// ```rust
/// use tether_core::reactive::Signal;
///
/// let count = Signal::new(0);
/// assert_eq!(count.get(), 0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    atom: Atom,
    value: Arc<RwLock<T>>,
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self::named("Signal", value)
    }

    /// Create a new signal with a debug name.
    pub fn named(name: impl Into<String>, value: T) -> Self {
        Self {
            atom: Atom::new(name),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> ObservableId {
        self.atom.id()
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also registers the
    /// current computation as a dependent.
    pub fn get(&self) -> T {
        self.atom.report_observed();
        self.value.read().clone()
    }

    /// Read the value by reference, tracking the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.atom.report_observed();
        f(&self.value.read())
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Set a new value and notify dependents.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        self.atom.report_changed();
    }

    /// Set a new value, returning the previous one.
    pub fn replace(&self, value: T) -> T {
        let previous = std::mem::replace(&mut *self.value.write(), value);
        self.atom.report_changed();
        previous
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = {
            let guard = self.value.read();
            f(&guard)
        };
        self.set(new_value);
    }

    /// Number of derivations observing this signal.
    pub fn observer_count(&self) -> usize {
        self.atom.observer_count()
    }
}

impl<T> Signal<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    /// Set a new value only if it differs from the current one.
    ///
    /// Returns `true` if the value changed.
    pub fn set_if_changed(&self, value: T) -> bool {
        {
            let mut guard = self.value.write();
            if *guard == value {
                return false;
            }
            *guard = value;
        }
        self.atom.report_changed();
        true
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            atom: self.atom.clone(),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
