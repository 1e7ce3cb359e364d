//! Host timer capability
//!
//! Guest code asks for "call me back in N ms" through the timer binding.
//! The wait happens on a timing thread; the callback itself is posted back
//! into the owning context's mailbox and runs on its execution thread.
//!
//! A callback is only ever delivered while its owner has not been
//! superseded by a newer published context. The check runs when the delay
//! elapses and again on the execution thread right before the guest
//! closure is called.

use crate::context::{Mailbox, Task};
use crate::generation::{ContextId, Generation};
use crate::stats;
use hotswap_metrics::Counter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Longest delay honoured, in milliseconds (matches browser timers).
pub const MAX_DELAY_MS: f64 = i32::MAX as f64;

/// Guest-side id of a scheduled closure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

/// Capability bound into the guest namespace.
pub trait TimerCapability: Send + Sync {
    /// Arrange for `callback.fire()` to be called once `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, callback: PendingCallback);
}

/// What happened when a callback came due.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// Posted to the owner's execution thread.
    Dispatched,
    /// A newer context has been published; dropped without running.
    Stale,
    /// The owner's execution thread is gone.
    Orphaned,
}

/// A deferred guest callback waiting for its delay to elapse.
pub struct PendingCallback {
    owner: ContextId,
    fire_at: Instant,
    action: CallbackId,
    mailbox: Mailbox,
    generation: Arc<Generation>,
    metrics: Arc<Counter>,
}

impl PendingCallback {
    pub fn owner(&self) -> ContextId {
        self.owner
    }

    pub fn fire_at(&self) -> Instant {
        self.fire_at
    }

    pub fn action(&self) -> CallbackId {
        self.action
    }

    /// Checked at fire time, never at schedule time.
    pub fn is_stale(&self) -> bool {
        self.generation.is_superseded(self.owner)
    }

    pub fn fire(self) -> FireOutcome {
        if self.is_stale() {
            trace!(context = %self.owner, callback = self.action.0, "dropping stale callback");
            self.metrics.increment(stats::TIMERS_DROPPED_STALE, 1);
            return FireOutcome::Stale;
        }

        match self.mailbox.send(Task::Fire { callback: self.action }) {
            Ok(()) => {
                self.metrics.increment(stats::TIMERS_DISPATCHED, 1);
                FireOutcome::Dispatched
            }
            Err(_) => {
                trace!(context = %self.owner, callback = self.action.0, "owner already torn down");
                FireOutcome::Orphaned
            }
        }
    }
}

impl std::fmt::Debug for PendingCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCallback")
            .field("owner", &self.owner)
            .field("fire_at", &self.fire_at)
            .field("action", &self.action)
            .finish()
    }
}

/// Per-context glue between the guest binding and a [`TimerCapability`].
pub(crate) struct TimerBridge {
    pub(crate) owner: ContextId,
    pub(crate) mailbox: Mailbox,
    pub(crate) generation: Arc<Generation>,
    pub(crate) metrics: Arc<Counter>,
    pub(crate) timer: Arc<dyn TimerCapability>,
}

impl TimerBridge {
    pub(crate) fn schedule(&self, callback: CallbackId, delay_ms: f64) {
        let delay = clamp_delay(delay_ms);
        let pending = PendingCallback {
            owner: self.owner,
            fire_at: Instant::now() + delay,
            action: callback,
            mailbox: self.mailbox.clone(),
            generation: Arc::clone(&self.generation),
            metrics: Arc::clone(&self.metrics),
        };
        trace!(context = %self.owner, callback = callback.0, ?delay, "callback scheduled");
        self.metrics.increment(stats::TIMERS_SCHEDULED, 1);
        self.timer.schedule_after(delay, pending);
    }
}

fn clamp_delay(delay_ms: f64) -> Duration {
    if delay_ms.is_finite() && delay_ms > 0.0 {
        Duration::from_micros((delay_ms.min(MAX_DELAY_MS) * 1000.0) as u64)
    } else {
        Duration::ZERO
    }
}

/// Default timer: one tokio task per callback on a dedicated timing thread.
pub struct TimerService {
    runtime: Option<tokio::runtime::Runtime>,
}

impl TimerService {
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("hotswap-timer")
            .enable_time()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }
}

impl Drop for TimerService {
    // Dropping a runtime blocks, which panics when the last owner is inside async code.
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl TimerCapability for TimerService {
    fn schedule_after(&self, _delay: Duration, callback: PendingCallback) {
        let Some(runtime) = &self.runtime else {
            return;
        };
        let deadline = tokio::time::Instant::from_std(callback.fire_at());
        runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            callback.fire();
        });
    }
}

impl std::fmt::Debug for TimerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerService").finish_non_exhaustive()
    }
}

/// Timer that only fires when told to. Useful for deterministic hosts and tests.
#[derive(Debug, Default)]
pub struct ManualTimer {
    queue: Mutex<Vec<PendingCallback>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Fire everything scheduled so far, earliest first, regardless of delay.
    pub fn fire_all(&self) -> Vec<FireOutcome> {
        let mut due = std::mem::take(&mut *self.queue.lock());
        due.sort_by_key(PendingCallback::fire_at);
        due.into_iter().map(PendingCallback::fire).collect()
    }
}

impl TimerCapability for ManualTimer {
    fn schedule_after(&self, _delay: Duration, callback: PendingCallback) {
        self.queue.lock().push(callback);
    }
}
