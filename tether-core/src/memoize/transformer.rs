//! Single-argument memoized transforms and explicit keep-alive.

use super::computed_fn::ComputedFn;
use super::key::{AsMemoKey, MemoArgs};
use crate::reactive::{Disposer, Effect, Memo, MemoOptions};

/// Memoized mapping from a source value to a derived value.
///
/// Built by [`create_transformer`].
pub struct Transformer<S, T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    inner: ComputedFn<(S,), T>,
}

/// Memoize `transform` per source.
///
/// Sources are keyed like [`ComputedFn`] arguments: handles by identity,
/// plain values by value.
pub fn create_transformer<S, T, F>(transform: F, options: MemoOptions) -> Transformer<S, T>
where
    S: AsMemoKey + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + PartialEq + 'static,
    F: Fn(&S) -> T + Send + Sync + 'static,
{
    let name = options
        .name
        .clone()
        .unwrap_or_else(|| "transformer".to_string());
    Transformer {
        inner: ComputedFn::with_options(name, move |(source,): &(S,)| transform(source), options),
    }
}

impl<S, T> Transformer<S, T>
where
    S: AsMemoKey + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + PartialEq + 'static,
{
    pub fn apply(&self, source: S) -> T {
        let args = (source,);
        self.inner.evaluate(args.memo_keys(), args)
    }

    /// Run `cleanup` with each result dropped from the cache.
    pub fn on_cleanup<F>(self, cleanup: F) -> Self
    where
        F: Fn(T, &S) + Send + Sync + 'static,
    {
        Self {
            inner: self.inner.on_cleanup(move |value, (source,)| cleanup(value, source)),
        }
    }

    pub fn memo_for(&self, source: &S) -> Option<Memo<T>> {
        self.inner.memo_for(&(source.clone(),))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<S, T> Clone for Transformer<S, T>
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Keep `memo` observed, and therefore cached, until the disposer runs.
pub fn keep_alive<T>(memo: &Memo<T>) -> Disposer
where
    T: Clone + Send + Sync + PartialEq + 'static,
{
    let memo = memo.clone();
    Effect::new(move || {
        memo.get();
    })
    .detach()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ObservableVec, Signal};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn transformer_memoizes_per_source_identity() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let total = create_transformer(
            move |items: &ObservableVec<i32>| {
                r.fetch_add(1, Ordering::SeqCst);
                items.to_vec().iter().sum::<i32>()
            },
            MemoOptions::default(),
        );

        let a = ObservableVec::new(vec![1, 2]);
        let b = ObservableVec::new(vec![1, 2]);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (t, a2, b2, s) = (total.clone(), a.clone(), b.clone(), seen.clone());
        let _effect = Effect::new(move || {
            let x = t.apply(a2.clone());
            let y = t.apply(a2.clone());
            let z = t.apply(b2.clone());
            s.lock().push(x + y + z);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(total.len(), 2);

        a.push(3);
        assert_eq!(*seen.lock(), vec![9, 15]);
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn transformer_cleanup_runs_when_unobserved() {
        let cleaned = Arc::new(Mutex::new(Vec::new()));
        let c = cleaned.clone();
        let upper = create_transformer(
            |name: &String| name.to_uppercase(),
            MemoOptions {
                name: Some("upper".to_string()),
                keep_alive: false,
            },
        )
        .on_cleanup(move |value, source| c.lock().push((value, source.clone())));

        let u = upper.clone();
        let effect = Effect::new(move || {
            u.apply("ada".to_string());
        });
        effect.dispose();

        assert_eq!(
            *cleaned.lock(),
            vec![("ADA".to_string(), "ada".to_string())]
        );
        assert!(upper.is_empty());
    }

    #[test]
    fn keep_alive_holds_memo_until_disposed() {
        let runs = Arc::new(AtomicUsize::new(0));
        let source = Signal::new(2);
        let (r, s) = (runs.clone(), source.clone());
        let memo = Memo::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
            s.get() * 10
        });

        let disposer = keep_alive(&memo);
        assert_eq!(memo.get(), 20);
        assert_eq!(memo.get(), 20);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set(3);
        assert_eq!(memo.get(), 30);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        disposer.dispose();
        assert!(!memo.has_value());
        assert_eq!(memo.dependent_count(), 0);
    }
}
