//! Observable wall-clock time.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::resource::FromResource;
use crate::diagnostics::Diagnostics;
use crate::reactive::Runtime;

/// Interval used by [`now`] when none is given.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// Milliseconds since the Unix epoch.
pub fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Source of observable time, one ticker per interval.
///
/// A ticker is a [`FromResource`] driven by a Tokio interval task. It runs
/// only while some derivation reads it, and every derivation reading the same
/// interval from the same clock sees the same ticks.
#[derive(Default)]
pub struct Clock {
    tickers: DashMap<Duration, FromResource<u64>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current time in milliseconds since the Unix epoch.
    ///
    /// Outside a derivation this is just the wall time. Inside one, the
    /// derivation re-runs every `interval`.
    pub fn now(&self, interval: Duration) -> u64 {
        if !Runtime::is_tracking() {
            return wall_millis();
        }
        let ticker = self
            .tickers
            .entry(interval)
            .or_insert_with(|| interval_ticker(interval))
            .clone();
        ticker.current().unwrap_or_else(|_| wall_millis())
    }

    /// Number of intervals that have a ticker.
    pub fn ticker_count(&self) -> usize {
        self.tickers.len()
    }

    /// Whether the ticker for `interval` is running.
    pub fn is_ticking(&self, interval: Duration) -> bool {
        self.tickers
            .get(&interval)
            .map(|ticker| ticker.is_alive())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("tickers", &self.tickers.len())
            .finish()
    }
}

fn interval_ticker(interval: Duration) -> FromResource<u64> {
    let task: std::sync::Arc<Mutex<Option<JoinHandle<()>>>> = Default::default();
    let start = task.clone();
    let stop = task;
    FromResource::named(
        format!("Clock({}ms)", interval.as_millis()),
        move |sink| {
            sink.send(wall_millis());
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                Diagnostics::global()
                    .warn_once("Clock ticker started outside a Tokio runtime; time will not advance");
                return;
            };
            let handle = runtime.spawn(async move {
                let mut ticks = tokio::time::interval(interval);
                // The first tick completes immediately; its value was sent above.
                ticks.tick().await;
                loop {
                    ticks.tick().await;
                    sink.send(wall_millis());
                }
            });
            *start.lock() = Some(handle);
        },
        move || {
            if let Some(handle) = stop.lock().take() {
                handle.abort();
            }
        },
        wall_millis(),
    )
}

thread_local! {
    static DEFAULT_CLOCK: Clock = Clock::new();
}

/// Current time from this thread's default clock.
///
/// See [`Clock::now`].
pub fn now(interval: Duration) -> u64 {
    DEFAULT_CLOCK.with(|clock| clock.now(interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Effect;
    use std::sync::Arc;

    #[test]
    fn untracked_reads_return_wall_time() {
        let clock = Clock::new();
        let before = wall_millis();

        let value = clock.now(Duration::from_millis(10));

        assert!(value >= before);
        assert_eq!(clock.ticker_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tracked_reads_tick_while_observed() {
        let clock = Arc::new(Clock::new());
        let interval = Duration::from_millis(100);

        let c = clock.clone();
        let effect = Effect::new(move || {
            c.now(interval);
        });
        assert!(clock.is_ticking(interval));
        assert_eq!(effect.run_count(), 1);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(effect.run_count() >= 3);

        effect.dispose();
        assert!(!clock.is_ticking(interval));
        let runs = effect.run_count();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(effect.run_count(), runs);
    }

    #[tokio::test(start_paused = true)]
    async fn observers_share_one_ticker_per_interval() {
        let clock = Arc::new(Clock::new());

        let c1 = clock.clone();
        let _fast = Effect::new(move || {
            c1.now(Duration::from_millis(50));
        });
        let c2 = clock.clone();
        let _also_fast = Effect::new(move || {
            c2.now(Duration::from_millis(50));
        });
        let c3 = clock.clone();
        let _slow = Effect::new(move || {
            c3.now(Duration::from_secs(1));
        });

        assert_eq!(clock.ticker_count(), 2);
    }
}
