//! Reactive Primitives
//!
//! This module implements the reactive engine the coordination primitives
//! are built on: atoms, signals, memos, effects, batches and observable
//! collections.
//!
//! # Concepts
//!
//! ## Atoms and Signals
//!
//! An Atom is the unit of observable identity. Reading it within a tracking
//! context (a memo or effect) registers that context as a dependent; reporting
//! it changed notifies all dependents. Atoms also say when they gain their
//! first observer and lose their last one. A Signal is an atom paired with a
//! value.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result while observed. It
//! re-evaluates only when one of its dependencies changes, and drops its cache
//! when nothing observes it any more.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! ## Batches and Actions
//!
//! Mutations inside [`Runtime::transaction`] are seen by effects as one
//! update. An action is an untracked batch.
//!
//! # Implementation Notes
//!
//! Change propagation is push-pull: a write pushes "maybe dirty" marks down
//! the graph, and a derivation pulls by comparing the versions of its
//! dependencies with the versions it saw when it last ran. Engine state lives
//! in thread-local storage.

mod atom;
mod collections;
mod context;
mod disposer;
mod effect;
mod memo;
mod runtime;
mod signal;
mod subscriber;

pub use atom::Atom;
pub use collections::{
    Change, ChangeKind, Identity, ObservableMap, ObservableObject, ObservableVec, VecChange,
};
pub use context::ReactiveContext;
pub use disposer::Disposer;
pub use effect::Effect;
pub use memo::{Memo, MemoOptions};
pub use runtime::{ActionRunInfo, BatchGuard, DerivationState, Runtime};
pub use signal::Signal;
pub use subscriber::{ObservableId, SubscriberId};
