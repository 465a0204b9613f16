//! Futures as observable state.
//!
//! A [`PromiseBridge`] owns a future and exposes its progress as a tracked
//! [`PromiseState`]: pending (optionally with a placeholder value), then
//! exactly once fulfilled or rejected. Settlement is written inside an action
//! boundary, so derivations see the status and value change together.
//!
//! Bridges created from futures spawn them on the current Tokio runtime. The
//! engine is thread-local, so use a current-thread runtime (the default for
//! `#[tokio::test]`).

use std::future::Future;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::reactive::{Runtime, Signal};

/// Status of a [`PromiseBridge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromiseStatus {
    Pending,
    Fulfilled,
    Rejected,
}

/// Observable state of a bridged future.
#[derive(Debug, Clone, PartialEq)]
pub enum PromiseState<T, E> {
    /// Not settled yet, with an optional placeholder value.
    Pending(Option<T>),
    Fulfilled(T),
    Rejected(E),
}

impl<T, E> PromiseState<T, E> {
    pub fn status(&self) -> PromiseStatus {
        match self {
            PromiseState::Pending(_) => PromiseStatus::Pending,
            PromiseState::Fulfilled(_) => PromiseStatus::Fulfilled,
            PromiseState::Rejected(_) => PromiseStatus::Rejected,
        }
    }
}

type Settled<T, E> = Shared<BoxFuture<'static, Option<Result<T, E>>>>;

/// Settles a bridge created with [`PromiseBridge::from_resolver`].
///
/// Both methods consume the resolver, so a bridge settles at most once.
/// Dropping it without settling leaves the bridge pending forever.
pub struct Resolver<T, E> {
    tx: oneshot::Sender<Result<T, E>>,
}

impl<T, E> Resolver<T, E> {
    pub fn resolve(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn reject(self, reason: E) {
        let _ = self.tx.send(Err(reason));
    }
}

/// A future whose progress is observable.
///
/// # Example
///
/// ```rust
/// use tether_core::bridge::{PromiseBridge, PromiseStatus};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bridge = PromiseBridge::<u32, String>::new(async { Ok(7) });
/// assert_eq!(bridge.status(), PromiseStatus::Pending);
///
/// assert_eq!(bridge.settled().await, Ok(7));
/// assert_eq!(bridge.status(), PromiseStatus::Fulfilled);
/// # }
/// ```
pub struct PromiseBridge<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    state: Signal<PromiseState<T, E>>,
    settled: Settled<T, E>,
}

impl<T, E> PromiseBridge<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Bridge a future, spawning it on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self::spawn(future, None)
    }

    /// Bridge a future, showing the value of `previous` while pending if
    /// `previous` is fulfilled.
    pub fn with_seed<F>(future: F, previous: &PromiseBridge<T, E>) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let placeholder = match previous.state.get_untracked() {
            PromiseState::Fulfilled(value) => Some(value),
            _ => None,
        };
        Self::spawn(future, placeholder)
    }

    /// Bridge a resolver function, which runs immediately.
    pub fn from_resolver<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T, E>),
    {
        let (tx, rx) = oneshot::channel();
        executor(Resolver { tx });
        Self::new(async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => std::future::pending().await,
            }
        })
    }

    /// A bridge that starts fulfilled.
    pub fn resolve(value: T) -> Self {
        Self::settled_with(Ok(value))
    }

    /// A bridge that starts rejected.
    pub fn reject(reason: E) -> Self {
        Self::settled_with(Err(reason))
    }

    fn settled_with(result: Result<T, E>) -> Self {
        let state = match &result {
            Ok(value) => PromiseState::Fulfilled(value.clone()),
            Err(reason) => PromiseState::Rejected(reason.clone()),
        };
        Self {
            state: Signal::named("PromiseBridge", state),
            settled: futures_util::future::ready(Some(result)).boxed().shared(),
        }
    }

    fn spawn<F>(future: F, placeholder: Option<T>) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let state = Signal::named("PromiseBridge", PromiseState::Pending(placeholder));
        let target = state.clone();
        let handle = tokio::spawn(async move {
            let result = future.await;
            settle(&target, &result);
            result
        });
        let settled = handle
            .map(|joined| match joined {
                Ok(result) => Some(result),
                Err(err) => {
                    tracing::error!(error = %err, "bridged future did not complete");
                    None
                }
            })
            .boxed()
            .shared();
        Self { state, settled }
    }

    /// Current state (tracked).
    pub fn state(&self) -> PromiseState<T, E> {
        self.state.get()
    }

    /// Current status (tracked).
    pub fn status(&self) -> PromiseStatus {
        self.state.with(PromiseState::status)
    }

    /// Fulfilled value, or the placeholder while pending (tracked).
    pub fn value(&self) -> Option<T> {
        self.state.with(|state| match state {
            PromiseState::Pending(placeholder) => placeholder.clone(),
            PromiseState::Fulfilled(value) => Some(value.clone()),
            PromiseState::Rejected(_) => None,
        })
    }

    /// Rejection reason (tracked).
    pub fn reason(&self) -> Option<E> {
        self.state.with(|state| match state {
            PromiseState::Rejected(reason) => Some(reason.clone()),
            _ => None,
        })
    }

    /// Dispatch on the current state (tracked).
    ///
    /// Returns `None` when no handler is registered for the current status.
    pub fn case<R>(&self, handlers: Case<'_, T, E, R>) -> Option<R> {
        match self.state.get() {
            PromiseState::Pending(placeholder) => handlers.pending.map(|f| f(placeholder)),
            PromiseState::Fulfilled(value) => handlers.fulfilled.map(|f| f(value)),
            PromiseState::Rejected(reason) => handlers.rejected.map(|f| f(reason)),
        }
    }

    /// Wait for settlement.
    ///
    /// If the underlying task is cancelled, or the resolver was dropped
    /// unsettled, this never completes.
    pub fn settled(&self) -> impl Future<Output = Result<T, E>> + Send + 'static {
        let settled = self.settled.clone();
        async move {
            match settled.await {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    /// Chain an async continuation, producing a new bridge.
    ///
    /// A rejection propagates without calling `f`.
    pub fn then<U, F, Fut>(&self, f: F) -> PromiseBridge<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, E>> + Send + 'static,
    {
        let settled = self.settled();
        PromiseBridge::new(async move {
            let value = settled.await?;
            f(value).await
        })
    }
}

fn settle<T, E>(state: &Signal<PromiseState<T, E>>, result: &Result<T, E>)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    if !matches!(state.get_untracked(), PromiseState::Pending(_)) {
        return;
    }
    match result {
        Ok(value) => Runtime::run_in_action("observableFromPromise-resolve", || {
            tracing::trace!("bridged future fulfilled");
            state.set(PromiseState::Fulfilled(value.clone()));
        }),
        Err(reason) => Runtime::run_in_action("observableFromPromise-reject", || {
            tracing::trace!("bridged future rejected");
            state.set(PromiseState::Rejected(reason.clone()));
        }),
    }
}

impl<T, E> Clone for PromiseBridge<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            settled: self.settled.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for PromiseBridge<T, E>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
    E: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromiseBridge")
            .field("state", &self.state.get_untracked())
            .finish()
    }
}

type Handler<'a, A, R> = Box<dyn FnOnce(A) -> R + 'a>;

/// Handlers for [`PromiseBridge::case`].
pub struct Case<'a, T, E, R> {
    pending: Option<Handler<'a, Option<T>, R>>,
    fulfilled: Option<Handler<'a, T, R>>,
    rejected: Option<Handler<'a, E, R>>,
}

impl<'a, T, E, R> Case<'a, T, E, R> {
    pub fn new() -> Self {
        Self {
            pending: None,
            fulfilled: None,
            rejected: None,
        }
    }

    /// Handler for the pending state; receives the placeholder, if any.
    pub fn pending(mut self, f: impl FnOnce(Option<T>) -> R + 'a) -> Self {
        self.pending = Some(Box::new(f));
        self
    }

    pub fn fulfilled(mut self, f: impl FnOnce(T) -> R + 'a) -> Self {
        self.fulfilled = Some(Box::new(f));
        self
    }

    pub fn rejected(mut self, f: impl FnOnce(E) -> R + 'a) -> Self {
        self.rejected = Some(Box::new(f));
        self
    }
}

impl<T, E, R> Default for Case<'_, T, E, R> {
    fn default() -> Self {
        Self::new()
    }
}
