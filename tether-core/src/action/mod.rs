//! Async actions with ordered steps.
//!
//! An [`ActionAsync`] runs its body as a sequence of synchronous steps, each
//! inside its own action boundary. Steps are separated by [`task`], which
//! suspends on a future and resumes in the order tasks were issued on the
//! current thread. Action state is thread-local, so actions are meant to run
//! on a current-thread Tokio runtime or a `LocalSet`.

mod action_async;
mod context;
mod order;
mod when;

pub use action_async::{task, ActionAsync};
pub use context::{boundary_name, current_action, open_steps, ActionStep};
pub use when::{when, When};
