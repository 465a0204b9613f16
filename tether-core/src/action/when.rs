//! Waiting for a reactive condition.

use std::future::IntoFuture;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::reactive::Effect;

/// Future that resolves once `predicate` returns `true`.
///
/// The predicate is tracked like an effect and re-evaluated whenever what
/// it read changes. Without a timeout the wait can last forever.
///
/// ```
/// use std::time::Duration;
/// use tether_core::action::when;
/// use tether_core::reactive::Signal;
/// use tether_core::Error;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let ready = Signal::new(false);
/// let r = ready.clone();
/// let result = when(move || r.get()).timeout(Duration::from_millis(10)).await;
/// assert_eq!(result, Err(Error::Timeout { timeout_ms: 10 }));
/// # }
/// ```
pub fn when<P>(predicate: P) -> When<P>
where
    P: Fn() -> bool + Send + Sync + 'static,
{
    When {
        predicate,
        timeout: None,
    }
}

#[must_use = "`when` does nothing unless awaited"]
pub struct When<P> {
    predicate: P,
    timeout: Option<Duration>,
}

impl<P> When<P> {
    /// Fail with [`Error::Timeout`] if the condition does not hold within
    /// `after`.
    pub fn timeout(mut self, after: Duration) -> Self {
        self.timeout = Some(after);
        self
    }
}

impl<P> IntoFuture for When<P>
where
    P: Fn() -> bool + Send + Sync + 'static,
{
    type Output = Result<()>;
    type IntoFuture = BoxFuture<'static, Result<()>>;

    fn into_future(self) -> Self::IntoFuture {
        let When { predicate, timeout } = self;
        Box::pin(async move {
            let (tx, rx) = oneshot::channel();
            let tx = Mutex::new(Some(tx));
            let effect = Effect::new(move || {
                if predicate() {
                    if let Some(tx) = tx.lock().take() {
                        let _ = tx.send(());
                    }
                }
            });

            let outcome = match timeout {
                Some(after) => match tokio::time::timeout(after, rx).await {
                    Ok(_) => Ok(()),
                    Err(_) => Err(Error::timeout(after)),
                },
                None => rx.await.map_err(|_| Error::disposed("when")),
            };
            effect.dispose();
            outcome
        })
    }
}
