//! Tether Core
//!
//! Coordination primitives on top of a small push-dirty / pull-version
//! reactive runtime. It implements:
//!
//! - Reactive primitives (atoms, signals, memos, effects, observable collections)
//! - Bridges from futures, external resources, time and streams into observable state
//! - Deep observation of nested containers with path tracking
//! - Memoized functions whose cache lives as long as it is observed
//! - Async actions whose steps resume in issuance order
//! - Grouped views, processors and view models over observable collections
//!
//! # Architecture
//!
//! - `reactive`: the runtime: dependency tracking, batching, action boundaries
//! - `bridge`: `PromiseBridge`, `LazyObservable`, `FromResource`, `Clock`, streams
//! - `observe`: `deep_observe` over a tree of observable containers
//! - `memoize`: `ComputedFn`, `create_transformer`, `keep_alive`
//! - `action`: `ActionAsync`, `task`, `when`
//! - `collection`: `GroupedObservableMap`, queue and chunk processors, `ViewModel`
//!
//! Runtime state is thread-local. Async pieces expect a current-thread Tokio
//! runtime.
//!
//! # Example
//!
//! ```rust
//! use tether_core::memoize::ComputedFn;
//! use tether_core::reactive::{Effect, Signal};
//!
//! let rate = Signal::new(2);
//! let r = rate.clone();
//! let convert = ComputedFn::new("convert", move |(amount,): &(i64,)| amount * r.get());
//!
//! let c = convert.clone();
//! let effect = Effect::new(move || {
//!     println!("100 -> {}", c.call((100,)).unwrap_or_default());
//! });
//!
//! // Recomputes the cached entry and re-runs the effect.
//! rate.set(3);
//! effect.dispose();
//! ```

pub mod action;
pub mod bridge;
pub mod collection;
pub mod diagnostics;
pub mod error;
pub mod memoize;
pub mod observe;
pub mod reactive;

pub use bridge::now;
pub use diagnostics::Diagnostics;
pub use error::{Error, Result};
