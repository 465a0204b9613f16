//! Issuance-ordered resumption.
//!
//! Every `task` takes a ticket when it suspends. Once its future settles it
//! waits until all earlier tickets have been served, so continuations run in
//! the order the tasks were issued, whatever order their futures settle in.
//!
//! While a `task` drives its future, tickets issued from inside that future
//! go to a queue owned by the task instead. They are ordered among
//! themselves only and never wait on the enclosing ticket.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::future::{poll_fn, Future};
use std::pin::pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

thread_local! {
    static QUEUE: Arc<OrderQueue> = Arc::new(OrderQueue::default());
    static SCOPE: RefCell<Option<Arc<OrderQueue>>> = const { RefCell::new(None) };
}

#[derive(Debug, Default)]
struct QueueState {
    issued: u64,
    serving: u64,
    released: BTreeSet<u64>,
}

#[derive(Debug, Default)]
pub(crate) struct OrderQueue {
    state: Mutex<QueueState>,
    turn: Notify,
}

impl OrderQueue {
    /// The queue of the innermost `task` being driven, or this thread's
    /// queue outside of one.
    pub(crate) fn current() -> Arc<OrderQueue> {
        SCOPE
            .with(|scope| scope.borrow().clone())
            .unwrap_or_else(|| QUEUE.with(Arc::clone))
    }

    /// Drive `future` with a fresh queue in scope for every poll.
    pub(crate) async fn nested<F: Future>(future: F) -> F::Output {
        let queue = Arc::new(OrderQueue::default());
        let mut future = pin!(future);
        poll_fn(|cx| {
            let _scope = ScopeGuard::enter(&queue);
            future.as_mut().poll(cx)
        })
        .await
    }

    pub(crate) fn issue(self: &Arc<Self>) -> Ticket {
        let number = {
            let mut state = self.state.lock();
            let number = state.issued;
            state.issued += 1;
            number
        };
        Ticket {
            queue: Arc::clone(self),
            number,
        }
    }

    fn is_turn(&self, number: u64) -> bool {
        self.state.lock().serving == number
    }

    fn release(&self, number: u64) {
        {
            let mut state = self.state.lock();
            state.released.insert(number);
            loop {
                let serving = state.serving;
                if !state.released.remove(&serving) {
                    break;
                }
                state.serving += 1;
            }
        }
        self.turn.notify_waiters();
    }

    /// Tickets issued and not yet released.
    pub(crate) fn outstanding(&self) -> u64 {
        let state = self.state.lock();
        state.issued - state.serving - state.released.len() as u64
    }
}

/// Restores the enclosing queue scope on drop.
struct ScopeGuard {
    previous: Option<Arc<OrderQueue>>,
}

impl ScopeGuard {
    fn enter(queue: &Arc<OrderQueue>) -> Self {
        let previous = SCOPE.with(|scope| scope.replace(Some(Arc::clone(queue))));
        Self { previous }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = SCOPE.try_with(|scope| *scope.borrow_mut() = previous);
    }
}

/// A place in the order queue. Dropping it gives up the place.
#[derive(Debug)]
pub(crate) struct Ticket {
    queue: Arc<OrderQueue>,
    number: u64,
}

impl Ticket {
    /// Wait until every earlier ticket has been released.
    pub(crate) async fn wait_turn(&self) {
        loop {
            let notified = self.queue.turn.notified();
            if self.queue.is_turn(self.number) {
                return;
            }
            notified.await;
        }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.queue.release(self.number);
    }
}
