//! Idempotent release handles.

use std::sync::Arc;

use parking_lot::Mutex;

type Release = Box<dyn FnOnce() + Send>;

/// Releases a subscription or registration.
///
/// Calling [`dispose`](Disposer::dispose) more than once is a no-op, and
/// clones share the same release. Dropping a `Disposer` does *not* release;
/// registrations live until explicitly disposed.
#[derive(Clone)]
pub struct Disposer {
    release: Arc<Mutex<Option<Release>>>,
}

impl Disposer {
    /// Wrap a release function.
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Arc::new(Mutex::new(Some(Box::new(release)))),
        }
    }

    /// A disposer that releases nothing.
    pub fn noop() -> Self {
        Self {
            release: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the release function if it has not run yet.
    pub fn dispose(&self) {
        // Taken out before running so a release that re-enters is a no-op.
        let release = self.release.lock().take();
        if let Some(release) = release {
            release();
        }
    }

    /// Whether the release has already run.
    pub fn is_disposed(&self) -> bool {
        self.release.lock().is_none()
    }
}

impl std::fmt::Debug for Disposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposer")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn dispose_runs_once() {
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        let disposer = Disposer::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!disposer.is_disposed());
        disposer.dispose();
        disposer.clone().dispose();
        disposer.dispose();

        assert!(disposer.is_disposed());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_does_not_release() {
        let count = Arc::new(AtomicI32::new(0));
        let c = count.clone();
        drop(Disposer::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
