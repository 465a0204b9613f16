//! Async actions split into ordered synchronous steps.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::context::{self, ActionContext, RunState};
use super::order::OrderQueue;
use crate::error::Error;

/// Await `future` from inside an async action.
///
/// Ends the current step before suspending. When the future has settled and
/// every `task` issued earlier on this thread has resumed, the next step is
/// opened and the future's output is returned. If the action already
/// finished in the meantime, no step is opened.
///
/// Tasks issued while `future` itself runs, such as the steps of another
/// action it awaits, are ordered among themselves and do not wait for this
/// one.
///
/// Fails with [`Error::NoActionContext`] outside an action.
pub async fn task<F, T, E>(future: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: From<Error>,
{
    let Some(ctx) = context::pop() else {
        return Err(Error::NoActionContext.into());
    };
    let ticket = OrderQueue::current().issue();
    let suspended = ctx.close(false);

    let output = OrderQueue::nested(future).await;
    ticket.wait_turn().await;
    drop(ticket);

    suspended.resume();
    output
}

/// A named async action.
///
/// Each call allocates a run id and runs `body` inside action boundaries
/// named `"<name> - runid <id> - step <n>"`. Steps are separated by
/// [`task`] calls; awaiting anything else directly keeps the current step
/// open across the suspension.
///
/// ```
/// use tether_core::action::{task, ActionAsync};
/// use tether_core::reactive::Signal;
/// use tether_core::Error;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let users = Signal::new(Vec::<String>::new());
/// let u = users.clone();
/// let load = ActionAsync::new("load", move |name: String| {
///     let users = u.clone();
///     async move {
///         let fetched = task(async { Ok::<_, Error>(name) }).await?;
///         users.update(|list| {
///             let mut list = list.clone();
///             list.push(fetched);
///             list
///         });
///         Ok::<_, Error>(())
///     }
/// });
///
/// load.call("ada".to_string()).await.unwrap();
/// assert_eq!(users.get_untracked(), vec!["ada".to_string()]);
/// # }
/// ```
pub struct ActionAsync<A, F> {
    name: Arc<str>,
    body: Arc<F>,
    _args: PhantomData<fn(A)>,
}

impl<A, F, Fut, T, E> ActionAsync<A, F>
where
    F: Fn(A) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error>,
{
    pub fn new(name: impl Into<String>, body: F) -> Self {
        let name: String = name.into();
        Self {
            name: Arc::from(name),
            body: Arc::new(body),
            _args: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start a run. Nothing happens until the returned future is polled.
    pub fn call(&self, args: A) -> impl Future<Output = Result<T, E>> {
        let name = Arc::clone(&self.name);
        let body = Arc::clone(&self.body);
        async move {
            let run = ActionRun::start(name);
            let output = body(args).await;
            run.finish(output)
        }
    }
}

impl<A, F> Clone for ActionAsync<A, F> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            body: Arc::clone(&self.body),
            _args: PhantomData,
        }
    }
}

/// Lifetime of one run. Dropping it before `finish` closes whatever step
/// the run still has open.
struct ActionRun {
    run_id: u64,
    name: Arc<str>,
    state: Arc<RunState>,
    closed: bool,
}

impl ActionRun {
    fn start(name: Arc<str>) -> Self {
        let run_id = context::next_run_id();
        let state = Arc::new(RunState::default());
        ActionContext::open(run_id, 0, Arc::clone(&name), Arc::clone(&state));
        Self {
            run_id,
            name,
            state,
            closed: false,
        }
    }

    fn finish<T, E>(mut self, output: Result<T, E>) -> Result<T, E>
    where
        E: From<Error>,
    {
        self.closed = true;
        self.state.finish();

        match context::pop() {
            Some(ctx) if ctx.run_id == self.run_id => {
                ctx.close(output.is_err());
                output
            }
            top => {
                let found = match top {
                    Some(ctx) => {
                        let found = format!("action '{}' run {}", ctx.name, ctx.run_id);
                        context::push(ctx);
                        found
                    }
                    None => "no action context".to_string(),
                };
                tracing::error!(
                    action = %self.name,
                    run_id = self.run_id,
                    found = %found,
                    "async action finished outside its own context"
                );
                if let Some(own) = context::remove_run(self.run_id) {
                    own.close(true);
                }
                Err(Error::InvalidActionContext {
                    expected: self.run_id,
                    found,
                }
                .into())
            }
        }
    }
}

impl Drop for ActionRun {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.state.finish();
        if let Some(ctx) = context::remove_run(self.run_id) {
            ctx.close(true);
        }
        tracing::trace!(action = %self.name, run_id = self.run_id, "async action dropped");
    }
}
