//! Memoized functions backed by one [`Memo`] per argument tuple.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::deep_map::DeepMap;
use super::key::{MemoArgs, MemoKeys};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::reactive::{Disposer, Memo, MemoOptions, Runtime};

type Compute<A, T> = Arc<dyn Fn(&A) -> T + Send + Sync>;
type Cleanup<A, T> = Arc<dyn Fn(T, &A) + Send + Sync>;

struct Entry<T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    memo: Memo<T>,
    hook: Disposer,
}

struct Shared<A, T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    name: String,
    compute: Compute<A, T>,
    keep_alive: bool,
    cleanup: Mutex<Option<Cleanup<A, T>>>,
    entries: Mutex<DeepMap<Entry<T>>>,
    created: AtomicU64,
}

/// A function whose results are cached per argument tuple while observed.
///
/// Calling it from a tracked context (an [`Effect`](crate::reactive::Effect)
/// or a [`Memo`]) creates or reuses a memo for the arguments. The memo is
/// evicted when nothing observes it anymore. Calls from outside any tracked
/// context are evaluated directly and not cached, unless `keep_alive` is set.
///
/// ```
/// use tether_core::memoize::ComputedFn;
/// use tether_core::reactive::{Effect, Signal};
///
/// let base = Signal::new(10);
/// let b = base.clone();
/// let add = ComputedFn::new("add", move |(n,): &(i32,)| b.get() + n);
///
/// let a = add.clone();
/// let effect = Effect::new(move || {
///     let _ = a.call((1,));
/// });
/// assert_eq!(add.len(), 1);
///
/// effect.dispose();
/// assert_eq!(add.len(), 0);
/// ```
pub struct ComputedFn<A, T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    shared: Arc<Shared<A, T>>,
}

impl<A, T> ComputedFn<A, T>
where
    A: MemoArgs,
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&A) -> T + Send + Sync + 'static,
    {
        Self::with_options(name, compute, MemoOptions::default())
    }

    /// `options.keep_alive` keeps every created memo cached for the lifetime
    /// of this function. `options.name` is ignored in favor of `name`.
    pub fn with_options<F>(name: impl Into<String>, compute: F, options: MemoOptions) -> Self
    where
        F: Fn(&A) -> T + Send + Sync + 'static,
    {
        let name = name.into();
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(DeepMap::new(name.clone())),
                name,
                compute: Arc::new(compute),
                keep_alive: options.keep_alive,
                cleanup: Mutex::new(None),
                created: AtomicU64::new(0),
            }),
        }
    }

    /// Run `cleanup` with a value that is dropped from the cache, or that
    /// was computed outside a tracked context.
    pub fn on_cleanup<F>(self, cleanup: F) -> Self
    where
        F: Fn(T, &A) + Send + Sync + 'static,
    {
        *self.shared.cleanup.lock() = Some(Arc::new(cleanup));
        self
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Evaluate for `args`, reusing the cached memo when there is one.
    ///
    /// Fails with [`Error::ArityMismatch`](crate::Error::ArityMismatch) when
    /// the number of arguments differs from the first call.
    pub fn call(&self, args: A) -> Result<T> {
        let keys = args.memo_keys();
        self.shared.entries.lock().check_arity(keys.len())?;
        Ok(self.evaluate(keys, args))
    }

    pub(crate) fn evaluate(&self, keys: MemoKeys, args: A) -> T {
        let cached = self
            .shared
            .entries
            .lock()
            .get(&keys)
            .map(|entry| entry.memo.clone());
        if let Some(memo) = cached {
            return memo.get();
        }

        let shared = &self.shared;
        if !shared.keep_alive && !Runtime::is_tracking() {
            Diagnostics::global().warn_once(untracked_call_warning(&shared.name));
            let value = (shared.compute)(&args);
            let cleanup = shared.cleanup.lock().clone();
            if let Some(cleanup) = cleanup {
                cleanup(value.clone(), &args);
            }
            return value;
        }

        let memo = self.create_entry(keys, args);
        memo.get()
    }

    fn create_entry(&self, keys: MemoKeys, args: A) -> Memo<T> {
        let shared = &self.shared;
        let index = shared.created.fetch_add(1, Ordering::Relaxed) + 1;
        let latest: Arc<Mutex<Option<T>>> = Arc::default();

        let compute = shared.compute.clone();
        let memo_args = args.clone();
        let last = latest.clone();
        let memo = Memo::with_options(
            move || {
                let value = compute(&memo_args);
                *last.lock() = Some(value.clone());
                value
            },
            MemoOptions {
                name: Some(format!("computedFn({}#{})", shared.name, index)),
                keep_alive: shared.keep_alive,
            },
        );

        let hook = if shared.keep_alive {
            Disposer::noop()
        } else {
            let weak = Arc::downgrade(&self.shared);
            let memo_id = memo.id();
            let hook_keys = keys.clone();
            memo.on_become_unobserved(move || {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let evicted = {
                    let mut entries = shared.entries.lock();
                    match entries.get(&hook_keys) {
                        Some(entry) if entry.memo.id() == memo_id => entries.remove(&hook_keys).ok(),
                        _ => None,
                    }
                };
                let Some(entry) = evicted else {
                    return;
                };
                entry.hook.dispose();
                let value = latest.lock().take();
                let cleanup = shared.cleanup.lock().clone();
                if let (Some(cleanup), Some(value)) = (cleanup, value) {
                    cleanup(value, &args);
                }
            })
        };

        shared.entries.lock().insert(
            &keys,
            Entry {
                memo: memo.clone(),
                hook,
            },
        );
        memo
    }

    /// The cached memo for `args`, if any.
    pub fn memo_for(&self, args: &A) -> Option<Memo<T>> {
        self.shared
            .entries
            .lock()
            .get(&args.memo_keys())
            .map(|entry| entry.memo.clone())
    }

    /// Number of cached argument tuples.
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A, T> Clone for ComputedFn<A, T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A, T> std::fmt::Debug for ComputedFn<A, T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedFn")
            .field("name", &self.shared.name)
            .field("keep_alive", &self.shared.keep_alive)
            .finish()
    }
}

fn untracked_call_warning(name: &str) -> String {
    format!(
        "computed function '{name}' invoked outside a reactive context is not memoized unless keep_alive is set"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memoize::MemoArgList;
    use crate::reactive::{Effect, Signal};
    use std::sync::atomic::AtomicUsize;

    fn counting_square() -> (ComputedFn<(i32,), i32>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let square = ComputedFn::new("square", move |(n,): &(i32,)| {
            c.fetch_add(1, Ordering::SeqCst);
            n * n
        });
        (square, calls)
    }

    #[test]
    fn tracked_calls_share_one_memo() {
        let (square, calls) = counting_square();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let f = square.clone();
        let s = seen.clone();
        let effect = Effect::new(move || {
            let a = f.call((3,)).unwrap_or_default();
            let b = f.call((3,)).unwrap_or_default();
            let c = f.call((4,)).unwrap_or_default();
            s.lock().push((a, b, c));
        });

        assert_eq!(*seen.lock(), vec![(9, 9, 16)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(square.len(), 2);
        let first = square.memo_for(&(3,));
        assert!(first.is_some());

        effect.dispose();
        assert!(square.is_empty());
    }

    #[test]
    fn untracked_calls_are_not_cached() {
        let (square, calls) = counting_square();

        assert_eq!(square.call((5,)), Ok(25));
        assert_eq!(square.call((5,)), Ok(25));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(square.is_empty());
        assert!(Diagnostics::global().has_warned(&untracked_call_warning("square")));
    }

    #[test]
    fn eviction_recomputes_on_next_use() {
        let (square, calls) = counting_square();

        let f = square.clone();
        let effect = Effect::new(move || {
            let _ = f.call((2,));
        });
        effect.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let f = square.clone();
        let effect = Effect::new(move || {
            let _ = f.call((2,));
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        effect.dispose();
    }

    #[test]
    fn recomputes_when_dependency_changes() {
        let factor = Signal::new(2);
        let fac = factor.clone();
        let scale = ComputedFn::new("scale", move |(n,): &(i32,)| n * fac.get());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let f = scale.clone();
        let s = seen.clone();
        let _effect = Effect::new(move || s.lock().push(f.call((5,)).unwrap_or_default()));

        factor.set(3);
        assert_eq!(*seen.lock(), vec![10, 15]);
        assert_eq!(scale.len(), 1);
    }

    #[test]
    fn keep_alive_caches_untracked_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let double = ComputedFn::with_options(
            "double",
            move |(n,): &(i32,)| {
                c.fetch_add(1, Ordering::SeqCst);
                n * 2
            },
            MemoOptions {
                keep_alive: true,
                ..MemoOptions::default()
            },
        );

        assert_eq!(double.call((4,)), Ok(8));
        assert_eq!(double.call((4,)), Ok(8));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(double.len(), 1);
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let sum = ComputedFn::new("sum", |args: &MemoArgList<i32>| args.0.iter().sum::<i32>());

        assert_eq!(sum.call(MemoArgList(vec![1, 2])), Ok(3));
        assert_eq!(
            sum.call(MemoArgList(vec![1, 2, 3])),
            Err(Error::ArityMismatch {
                name: "sum".to_string(),
                expected: 2,
                got: 3,
            })
        );
    }

    #[test]
    fn cleanup_runs_on_eviction() {
        let cleaned = Arc::new(Mutex::new(Vec::new()));
        let c = cleaned.clone();
        let label = ComputedFn::new("label", |(n,): &(u32,)| format!("#{n}"))
            .on_cleanup(move |value, (n,)| c.lock().push((value, *n)));

        let f = label.clone();
        let effect = Effect::new(move || {
            let _ = f.call((7,));
        });
        assert!(cleaned.lock().is_empty());

        effect.dispose();
        assert_eq!(*cleaned.lock(), vec![("#7".to_string(), 7)]);
    }

    #[test]
    fn memo_names_carry_function_name() {
        let (square, _) = counting_square();
        let f = square.clone();
        let _effect = Effect::new(move || {
            let _ = f.call((1,));
        });

        let memo = square.memo_for(&(1,));
        assert_eq!(memo.map(|m| m.name().to_string()), Some("computedFn(square#1)".to_string()));
    }
}
