//! Drain an observable vector as items arrive.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::diagnostics::Diagnostics;
use crate::reactive::{Disposer, Effect, ObservableVec, Runtime};

type Drain = Arc<dyn Fn() + Send + Sync>;

/// Call `processor` once per item pushed to `queue`, removing the items.
///
/// With a zero `debounce` items are processed as soon as the change that
/// added them completes. Otherwise processing waits `debounce` on the Tokio
/// runtime, collecting whatever else arrives meanwhile. Items already in the
/// queue are processed right away.
pub fn queue_processor<T, P>(queue: &ObservableVec<T>, processor: P, debounce: Duration) -> Disposer
where
    T: Clone + Send + Sync + 'static,
    P: Fn(T) + Send + Sync + 'static,
{
    let q = queue.clone();
    let drain: Drain = Arc::new(move || {
        let items = Runtime::run_in_action("queueProcessor", || q.splice(0, usize::MAX, Vec::new()));
        for item in items {
            Runtime::run_in_action("queueProcessor", || processor(item));
        }
    });
    watch(queue, debounce, drain)
}

/// Like [`queue_processor`], but hands items over in chunks of at most
/// `max_chunk` (0 means everything queued).
pub fn chunk_processor<T, P>(
    queue: &ObservableVec<T>,
    processor: P,
    debounce: Duration,
    max_chunk: usize,
) -> Disposer
where
    T: Clone + Send + Sync + 'static,
    P: Fn(Vec<T>) + Send + Sync + 'static,
{
    let q = queue.clone();
    let drain: Drain = Arc::new(move || loop {
        let chunk = Runtime::run_in_action("chunkProcessor", || {
            let len = q.to_vec_untracked().len();
            let size = if max_chunk == 0 { len } else { len.min(max_chunk) };
            q.splice(0, size, Vec::new())
        });
        if chunk.is_empty() {
            break;
        }
        Runtime::run_in_action("chunkProcessor", || processor(chunk));
    });
    watch(queue, debounce, drain)
}

fn watch<T>(queue: &ObservableVec<T>, debounce: Duration, drain: Drain) -> Disposer
where
    T: Clone + Send + Sync + 'static,
{
    let q = queue.clone();
    if debounce.is_zero() {
        return Effect::new(move || {
            if !q.is_empty() {
                drain();
            }
        })
        .detach();
    }

    let pending: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::default();
    let slot = Arc::clone(&pending);
    let effect = Effect::new(move || {
        if q.is_empty() {
            return;
        }
        let mut scheduled = slot.lock();
        if scheduled.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            drop(scheduled);
            Diagnostics::global().warn_once("debounced processor used outside a Tokio runtime; draining immediately");
            drain();
            return;
        };
        let drain = Arc::clone(&drain);
        let slot = Arc::clone(&slot);
        *scheduled = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            slot.lock().take();
            drain();
        }));
    });

    let stop = effect.detach();
    Disposer::new(move || {
        stop.dispose();
        if let Some(handle) = pending.lock().take() {
            handle.abort();
        }
    })
}
