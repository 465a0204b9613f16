//! Bridges between reactive expressions and async streams.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::resource::FromResource;
use crate::diagnostics::Diagnostics;
use crate::reactive::Effect;

/// Stream of successive values of a reactive expression.
///
/// Created by [`to_stream`]. Dropping the stream stops tracking.
pub struct ExprStream<T> {
    rx: mpsc::UnboundedReceiver<T>,
    reaction: Effect,
}

impl<T> Stream for ExprStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for ExprStream<T> {
    fn drop(&mut self) {
        self.reaction.dispose();
    }
}

/// Turn a reactive expression into a stream of its values.
///
/// A value is emitted each time the expression produces a different result.
/// With `fire_immediately` the current value is emitted first.
pub fn to_stream<T, F>(expression: F, fire_immediately: bool) -> ExprStream<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let reaction = Effect::reaction(
        expression,
        move |value: &T| {
            // The receiver only goes away together with the reaction.
            let _ = tx.send(value.clone());
        },
        fire_immediately,
    );
    ExprStream { rx, reaction }
}

type SharedStream<T> = Arc<tokio::sync::Mutex<Pin<Box<dyn Stream<Item = T> + Send>>>>;

/// Expose the latest item of a stream as an observable value.
///
/// The stream is polled by a spawned task only while the value is observed.
/// Polling pauses when the last observer goes away and resumes, on the same
/// stream, when a new one arrives.
pub fn from_stream<T, S>(stream: S, initial: T) -> FromResource<T>
where
    T: Clone + Send + Sync + 'static,
    S: Stream<Item = T> + Send + 'static,
{
    let source: SharedStream<T> = Arc::new(tokio::sync::Mutex::new(Box::pin(stream)));
    let task: Arc<Mutex<Option<JoinHandle<()>>>> = Default::default();
    let start = task.clone();
    let stop = task;

    FromResource::named(
        "StreamListener",
        move |sink| {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                Diagnostics::global()
                    .warn_once("from_stream observed outside a Tokio runtime; the stream is not polled");
                return;
            };
            let source = source.clone();
            let handle = runtime.spawn(async move {
                let mut stream = source.lock().await;
                while let Some(item) = stream.next().await {
                    sink.send(item);
                }
            });
            *start.lock() = Some(handle);
        },
        move || {
            if let Some(handle) = stop.lock().take() {
                handle.abort();
            }
        },
        initial,
    )
}
