//! Lazily fetched and lazily subscribed values.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::reactive::{Atom, Runtime, Signal};

/// Callback handed to fetch and subscribe routines to publish new values.
pub struct Sink<T> {
    push: Arc<dyn Fn(T) + Send + Sync>,
}

impl<T> Sink<T> {
    fn new(push: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            push: Arc::new(push),
        }
    }

    /// Publish a new value.
    pub fn send(&self, value: T) {
        (self.push)(value)
    }
}

impl<T> Clone for Sink<T> {
    fn clone(&self) -> Self {
        Self {
            push: self.push.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Sink<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Sink")
    }
}

// ----------------------------------------------------------------------------
// LazyObservable
// ----------------------------------------------------------------------------

struct LazyInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fetch: Box<dyn Fn(Sink<T>) + Send + Sync>,
    initial: T,
    value: Signal<T>,
    pending: Signal<bool>,
    started: AtomicBool,
}

/// A value that is fetched on first read.
///
/// The fetch routine runs at most once until [`refresh`](Self::refresh) or
/// [`reset`](Self::reset) re-arms it. It may publish any number of values
/// through its sink, synchronously or later.
pub struct LazyObservable<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<LazyInner<T>>,
}

impl<T> LazyObservable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<F>(fetch: F, initial: T) -> Self
    where
        F: Fn(Sink<T>) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(LazyInner {
                fetch: Box::new(fetch),
                value: Signal::named("LazyObservable", initial.clone()),
                initial,
                pending: Signal::named("LazyObservable.pending", false),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Current value, starting the fetch on the first call.
    pub fn current(&self) -> T {
        let inner = &self.inner;
        if !inner.started.swap(true, Ordering::SeqCst) {
            inner.pending.set(true);
            let value = inner.value.clone();
            let pending = inner.pending.clone();
            (inner.fetch)(Sink::new(move |new_value| {
                Runtime::transaction(|| {
                    value.set(new_value);
                    pending.set(false);
                });
            }));
        }
        inner.value.get()
    }

    /// Re-run the fetch if it has started; otherwise return the value.
    pub fn refresh(&self) -> T {
        if self.inner.started.swap(false, Ordering::SeqCst) {
            self.current()
        } else {
            self.inner.value.get()
        }
    }

    /// Restore the initial value and disarm the fetch.
    pub fn reset(&self) -> T {
        Runtime::run_in_action("lazyObservable-reset", || {
            self.inner.started.store(false, Ordering::SeqCst);
            self.inner.value.set(self.inner.initial.clone());
        });
        self.inner.value.get()
    }

    /// Whether a fetch is in flight (tracked).
    pub fn pending(&self) -> bool {
        self.inner.pending.get()
    }
}

impl<T> Clone for LazyObservable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// FromResource
// ----------------------------------------------------------------------------

type Subscribe<T> = Box<dyn Fn(Sink<T>) + Send + Sync>;
type Unsubscribe = Box<dyn Fn() + Send + Sync>;

struct ResourceInner<T> {
    atom: Atom,
    value: RwLock<T>,
    active: AtomicBool,
    disposed: AtomicBool,
    subscribe: Subscribe<T>,
    unsubscribe: Unsubscribe,
}

impl<T> ResourceInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn activate(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) || self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(resource = self.atom.name(), "resource subscribed");
        let weak: Weak<Self> = Arc::downgrade(self);
        (self.subscribe)(Sink::new(move |new_value| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.disposed.load(Ordering::SeqCst) {
                return;
            }
            Runtime::transaction(|| {
                *inner.value.write() = new_value;
                inner.atom.report_changed();
            });
        }));
    }

    fn suspend(&self) {
        if self.active.swap(false, Ordering::SeqCst) {
            tracing::debug!(resource = self.atom.name(), "resource unsubscribed");
            (self.unsubscribe)();
        }
    }
}

/// A value backed by an external source that is subscribed only while
/// observed.
///
/// The source is subscribed when the first derivation starts reading the
/// value and unsubscribed when the last one stops.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use parking_lot::Mutex;
/// use tether_core::bridge::FromResource;
/// use tether_core::reactive::Effect;
///
/// let resource = FromResource::new(|sink| sink.send(42), || {}, 0);
/// let seen = Arc::new(Mutex::new(0));
///
/// let r = resource.clone();
/// let s = seen.clone();
/// let effect = Effect::new(move || *s.lock() = r.current().unwrap_or_default());
/// assert_eq!(*seen.lock(), 42);
/// assert!(resource.is_alive());
///
/// effect.dispose();
/// assert!(!resource.is_alive());
/// ```
pub struct FromResource<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<ResourceInner<T>>,
}

impl<T> FromResource<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new<S, U>(subscribe: S, unsubscribe: U, initial: T) -> Self
    where
        S: Fn(Sink<T>) + Send + Sync + 'static,
        U: Fn() + Send + Sync + 'static,
    {
        Self::named("ResourceBasedObservable", subscribe, unsubscribe, initial)
    }

    pub fn named<S, U>(name: impl Into<String>, subscribe: S, unsubscribe: U, initial: T) -> Self
    where
        S: Fn(Sink<T>) + Send + Sync + 'static,
        U: Fn() + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|weak: &Weak<ResourceInner<T>>| {
            let on_observed = weak.clone();
            let on_unobserved = weak.clone();
            ResourceInner {
                atom: Atom::with_callbacks(
                    name,
                    move || {
                        if let Some(inner) = on_observed.upgrade() {
                            inner.activate();
                        }
                    },
                    move || {
                        if let Some(inner) = on_unobserved.upgrade() {
                            inner.suspend();
                        }
                    },
                ),
                value: RwLock::new(initial),
                active: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                subscribe: Box::new(subscribe),
                unsubscribe: Box::new(unsubscribe),
            }
        });
        Self { inner }
    }

    /// Current value.
    ///
    /// Read inside a derivation this subscribes to the source. Read outside
    /// one while inactive it returns the cached value and logs a warning,
    /// since no subscription is started.
    pub fn current(&self) -> Result<T> {
        let inner = &self.inner;
        if inner.disposed.load(Ordering::SeqCst) {
            return Err(Error::disposed(inner.atom.name()));
        }
        let tracked = inner.atom.report_observed();
        if !tracked && !inner.active.load(Ordering::SeqCst) {
            Diagnostics::global().warn_once(format!(
                "Called `current` of {} outside a reaction. Current value will be returned but no new subscription has started",
                inner.atom.name()
            ));
        }
        Ok(inner.value.read().clone())
    }

    /// Unsubscribe and refuse further reads. Disposing twice is a no-op.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.suspend();
    }

    /// Whether the source is currently subscribed.
    pub fn is_alive(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl<T> Clone for FromResource<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for FromResource<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FromResource")
            .field("name", &self.inner.atom.name())
            .field("value", &*self.inner.value.read())
            .field("alive", &self.is_alive())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
