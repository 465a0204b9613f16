//! One-time warnings.

use std::sync::OnceLock;

use dashmap::DashSet;

/// Deduplicating warning sink.
///
/// Each distinct message is logged through `tracing::warn!` the first time
/// it is reported and ignored afterwards. The process-wide instance is
/// returned by [`Diagnostics::global`]; tests can create their own.
#[derive(Debug, Default)]
pub struct Diagnostics {
    seen: DashSet<String>,
}

impl Diagnostics {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide sink.
    pub fn global() -> &'static Diagnostics {
        static GLOBAL: OnceLock<Diagnostics> = OnceLock::new();
        GLOBAL.get_or_init(Diagnostics::new)
    }

    /// Log `message` unless it was logged before. Returns `true` if logged.
    pub fn warn_once(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        if self.seen.contains(&message) {
            return false;
        }
        tracing::warn!("{}", message);
        self.seen.insert(message)
    }

    /// Whether `message` has been reported.
    pub fn has_warned(&self, message: &str) -> bool {
        self.seen.contains(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warns_once_per_message() {
        let diagnostics = Diagnostics::new();

        assert!(diagnostics.warn_once("a"));
        assert!(!diagnostics.warn_once("a"));
        assert!(diagnostics.warn_once("b"));
        assert!(diagnostics.has_warned("a"));
        assert!(!diagnostics.has_warned("c"));
    }
}
