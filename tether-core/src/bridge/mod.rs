//! Bridges from the outside world into observable state.
//!
//! - [`PromiseBridge`]: a future as a pending/fulfilled/rejected state machine.
//! - [`LazyObservable`]: a value fetched on first read.
//! - [`FromResource`]: a value subscribed to only while observed.
//! - [`Clock`]: observable time built on `FromResource`.
//! - [`to_stream`] / [`from_stream`]: expressions as streams and back.

mod clock;
mod promise;
mod resource;
mod stream;

pub use clock::{now, wall_millis, Clock, DEFAULT_INTERVAL};
pub use promise::{Case, PromiseBridge, PromiseState, PromiseStatus, Resolver};
pub use resource::{FromResource, LazyObservable, Sink};
pub use stream::{from_stream, to_stream, ExprStream};
