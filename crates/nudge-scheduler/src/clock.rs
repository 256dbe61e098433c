//! Clock and one-shot timer service.
//!
//! All instants are UTC. The scheduler reads "now" from a [`Clock`] and hands
//! fire callbacks to a [`Timer`]; both are injected so tests can drive time.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::task::AbortHandle;
use tokio::time::sleep;

/// Future run when a timer fires.
pub type FireFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a pending timer.
///
/// Cancelling after the timer fired does nothing.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, task: Option<AbortHandle>) -> Self {
        Self { cancelled, task }
    }

    /// Cancel the timer.
    pub fn cancel(self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task {
            task.abort();
        }
    }

    /// Whether [`TimerHandle::cancel`] was called on this timer.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One-shot timer service.
pub trait Timer: Send + Sync {
    /// Run `fire` at `at`, or as soon as possible if `at` is not in the future.
    fn schedule(&self, at: DateTime<Utc>, fire: FireFuture) -> TimerHandle;
}

/// Timer backed by tokio tasks.
///
/// Each timer is a task sleeping until its deadline. When the deadline passes
/// the fire future is spawned as its own task, so cancelling a timer that
/// already fired cannot interrupt a delivery.
pub struct TokioTimer {
    clock: Arc<dyn Clock>,
}

impl TokioTimer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, at: DateTime<Utc>, fire: FireFuture) -> TimerHandle {
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let task = tokio::spawn(async move {
            sleep(delay).await;
            if !flag.load(Ordering::SeqCst) {
                tokio::spawn(fire);
            }
        });

        TimerHandle::new(cancelled, Some(task.abort_handle()))
    }
}

struct PendingFire {
    at: DateTime<Utc>,
    cancelled: Arc<AtomicBool>,
    fire: FireFuture,
}

/// Timer that fires only when [`ManualTimer::fire_due`] is called.
#[derive(Default)]
pub struct ManualTimer {
    pending: Mutex<Vec<PendingFire>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of scheduled timers that are neither cancelled nor fired.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| !p.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Deadlines of live timers, earliest first.
    pub fn deadlines(&self) -> Vec<DateTime<Utc>> {
        let mut deadlines: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|p| !p.cancelled.load(Ordering::SeqCst))
            .map(|p| p.at)
            .collect();
        deadlines.sort();
        deadlines
    }

    /// Run every live timer due at `now`, in deadline order.
    ///
    /// Cancelled timers are discarded. Returns how many fired.
    pub async fn fire_due(&self, now: DateTime<Utc>) -> usize {
        let mut due = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.retain(|p| !p.cancelled.load(Ordering::SeqCst));
            let (due, later): (Vec<_>, Vec<_>) =
                pending.drain(..).partition(|p| p.at <= now);
            *pending = later;
            due
        };
        due.sort_by_key(|p| p.at);

        let count = due.len();
        for pending in due {
            pending.fire.await;
        }
        count
    }
}

impl Timer for ManualTimer {
    fn schedule(&self, at: DateTime<Utc>, fire: FireFuture) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PendingFire {
                at,
                cancelled: Arc::clone(&cancelled),
                fire,
            });
        TimerHandle::new(cancelled, None)
    }
}
