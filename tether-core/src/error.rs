//! Error types for tether primitives

use thiserror::Error;

/// Result type for tether operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the coordination primitives.
///
/// Contract violations are returned at the call site. Inside change
/// listeners, which have nowhere to return an error, the same conditions
/// panic with the `Display` text of the matching variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// `task` was awaited with no enclosing async action
    #[error("'task' can only be used inside an async action (did you await directly instead of through 'task'?)")]
    NoActionContext,

    /// An async action finished while another action's context was on top
    #[error("invalid async action context: expected run {expected}, found {found}")]
    InvalidActionContext { expected: u64, found: String },

    /// A memoized function was called with a different number of arguments
    #[error("memoized function '{name}' called with {got} arguments, expected {expected}")]
    ArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },

    /// A memo entry was deleted that does not exist
    #[error("memo entry not found: {0}")]
    MissingEntry(String),

    /// A container was attached at two positions of one observed tree
    #[error("the same observable object cannot appear twice in the same tree, trying to assign it to '{attempted}', but it already exists at '{existing}'")]
    TreeAliasing { attempted: String, existing: String },

    /// The resource was read after disposal
    #[error("{0} has already been disposed")]
    Disposed(String),

    /// A mutating accessor was called on a derived read-only structure
    #[error("{0} is read-only")]
    ReadOnly(String),

    /// Index outside the bounds of an observable vector
    #[error("index out of bounds: {index} is not smaller than {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A `when` condition did not hold within its budget
    #[error("condition not satisfied within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl Error {
    /// Create a disposed error naming the resource
    pub fn disposed(what: impl Into<String>) -> Self {
        Self::Disposed(what.into())
    }

    /// Create a read-only error naming the structure
    pub fn read_only(what: impl Into<String>) -> Self {
        Self::ReadOnly(what.into())
    }

    /// Create a timeout error from a duration
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: after.as_millis() as u64,
        }
    }
}
