//! Priority-ordered, rate-limited dispatch of outbound calls.
//!
//! Every call to the remote API goes through one [`RequestScheduler`]. A
//! recurring tick releases at most one queued operation, taking the oldest
//! entry of the highest non-empty priority. When the queues drain the tick
//! task exits; the next [`RequestScheduler::schedule`] starts a new one whose
//! first tick fires immediately.
//!
//! # Example
//!
//! ```ignore
//! use wikisync::scheduler::{Priority, RequestScheduler};
//!
//! let scheduler = RequestScheduler::per_minute(39);
//! let body = scheduler
//!     .schedule(Priority::High, move || async move { transport.send(request).await })
//!     .await??;
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;

/// Request ceiling published by the remote API, per minute.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 39;

/// Scheduling priority. Higher priorities always dispatch first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    /// Authentication and token refresh.
    High,
    /// Reads and writes of normal sync traffic.
    Medium,
    /// Background work that may wait.
    Low,
}

impl Priority {
    /// Dispatch order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => f.write_str("high"),
            Priority::Medium => f.write_str("medium"),
            Priority::Low => f.write_str("low"),
        }
    }
}

/// Errors surfaced through a [`Pending`] handle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// The operation was dropped before producing a result (it panicked, or
    /// the runtime shut down).
    #[error("scheduled operation was dropped before completing")]
    Dropped,

    /// The tick task found itself out of sync with the scheduler state.
    #[error("rate limit timer fault: {0}")]
    TimerFault(String),
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A queued unit of work. Running it drives the operation and delivers the
/// result to the waiting [`Pending`].
struct ScheduledCall {
    run: Box<dyn FnOnce() -> BoxFuture + Send>,
}

#[derive(Default)]
struct SchedulerState {
    queues: [VecDeque<ScheduledCall>; 3],
    /// Generation of the live tick task, `None` while idle.
    ticker: Option<u64>,
    generation: u64,
    dispatched: u64,
}

impl SchedulerState {
    fn pop_next(&mut self) -> Option<(Priority, ScheduledCall)> {
        Priority::ALL
            .into_iter()
            .find_map(|p| self.queues[p.index()].pop_front().map(|call| (p, call)))
    }

    fn queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

struct Inner {
    tick: Duration,
    state: Mutex<SchedulerState>,
}

/// Bounded-throughput, priority-queued dispatcher.
///
/// Cloning is cheap; clones share the same queues and tick.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<Inner>,
}

impl fmt::Debug for RequestScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScheduler")
            .field("tick", &self.inner.tick)
            .field("queued", &self.queued())
            .finish()
    }
}

/// Result handle for a scheduled operation.
///
/// Resolves once the operation has been dispatched and has finished.
#[must_use = "a scheduled operation's result is only observable through its handle"]
pub struct Pending<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T, SchedulerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| SchedulerError::Dropped))
    }
}

impl RequestScheduler {
    /// Create a scheduler that dispatches at most one call per `tick`.
    pub fn new(tick: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tick: tick.max(Duration::from_millis(1)),
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    /// Create a scheduler for a requests-per-minute ceiling.
    ///
    /// The tick is 60s / `requests_per_minute`; pass a ceiling below the
    /// server's advertised one to leave headroom.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self::new(Duration::from_secs(60) / rpm)
    }

    /// Interval between dispatches.
    pub fn tick(&self) -> Duration {
        self.inner.tick
    }

    /// Number of operations waiting for dispatch.
    pub fn queued(&self) -> usize {
        self.lock().queued()
    }

    /// Number of operations dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.lock().dispatched
    }

    /// True when no tick task is running.
    pub fn is_idle(&self) -> bool {
        self.lock().ticker.is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `operation` at `priority`.
    ///
    /// The operation never runs inside this call; it runs on its own task
    /// once a tick releases it. Must be called from within a Tokio runtime.
    pub fn schedule<F, Fut, T>(&self, priority: Priority, operation: F) -> Pending<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let call = ScheduledCall {
            run: Box::new(move || {
                Box::pin(async move {
                    // The receiver may have been dropped; the result is
                    // simply discarded then.
                    let _ = tx.send(operation().await);
                }) as BoxFuture
            }),
        };

        let mut state = self.lock();
        state.queues[priority.index()].push_back(call);
        tracing::trace!(%priority, queued = state.queued(), "Scheduled call");

        if state.ticker.is_none() {
            state.generation += 1;
            let generation = state.generation;
            state.ticker = Some(generation);
            tokio::spawn(run_ticker(Arc::clone(&self.inner), generation));
        }

        Pending { rx }
    }
}

/// Tick loop: one dispatch per tick until the queues are empty.
async fn run_ticker(inner: Arc<Inner>, generation: u64) {
    let mut interval = tokio::time::interval(inner.tick);
    // Never catch up with a burst of ticks after a stall.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let (priority, call) = {
            let mut state = inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            if state.ticker != Some(generation) {
                let fault = SchedulerError::TimerFault(format!(
                    "tick from generation {generation} while {:?} is active",
                    state.ticker
                ));
                tracing::error!(error = %fault, "Scheduler invariant violated");
                debug_assert!(false, "{fault}");
                return;
            }
            match state.pop_next() {
                Some(next) => {
                    state.dispatched += 1;
                    next
                }
                None => {
                    state.ticker = None;
                    tracing::trace!(generation, "Scheduler idle");
                    return;
                }
            }
        };

        tracing::trace!(%priority, "Dispatching call");
        tokio::spawn((call.run)());
    }
}
