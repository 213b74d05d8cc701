//! Liveness deadline timer
//!
//! A `Watchdog` fires a callback once if it is not reset within the armed
//! interval. It knows nothing about signaling; the controller resets it on
//! every received frame and treats expiry as a dead connection.
//!
//! Every scheduled firing carries the epoch it was scheduled under. Firing
//! checks and consumes the epoch under the same lock that `reset` and
//! `disarm` bump it under, so a cancelled timer can never fire and a firing
//! timer can never fire twice.
//!
//! ```
//! use sora_signaling::Watchdog;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let watchdog = Watchdog::new();
//! watchdog.arm(Duration::from_secs(30), || eprintln!("signaling link is silent"));
//! assert!(watchdog.is_armed());
//!
//! // Traffic arrived: push the deadline out again
//! assert!(watchdog.reset());
//!
//! watchdog.disarm();
//! assert!(!watchdog.is_armed());
//! assert!(!watchdog.reset());
//! # });
//! ```

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Callback invoked on expiry
pub type ExpireCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Inner {
    /// Bumped on every (re)schedule and cancellation
    epoch: u64,
    /// Interval and callback of the last `arm`
    armed: Option<(Duration, ExpireCallback)>,
    /// Outstanding timer task, at most one
    pending: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_pending(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        if let Some(task) = self.pending.take() {
            task.abort();
        }
    }
}

/// Single-shot deadline timer with reset
pub struct Watchdog {
    inner: Arc<Mutex<Inner>>,
}

impl Watchdog {
    /// Create a disarmed watchdog
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Schedule `on_expire` to run after `interval` unless reset
    ///
    /// Replaces any previously armed deadline.
    pub fn arm<F>(&self, interval: Duration, on_expire: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        let callback: ExpireCallback = Arc::new(on_expire);
        let mut inner = self.inner.lock();
        inner.cancel_pending();
        inner.armed = Some((interval, Arc::clone(&callback)));
        let epoch = inner.epoch;
        inner.pending = Some(Self::spawn_timer(
            Arc::downgrade(&self.inner),
            epoch,
            interval,
            callback,
        ));
        trace!(?interval, epoch, "watchdog armed");
    }

    /// Cancel the pending deadline and reschedule it from now
    ///
    /// Returns false if the watchdog was never armed or has been disarmed.
    /// Resetting after expiry schedules a fresh deadline.
    pub fn reset(&self) -> bool {
        let mut inner = self.inner.lock();
        let Some((interval, callback)) = inner.armed.clone() else {
            return false;
        };
        inner.cancel_pending();
        let epoch = inner.epoch;
        inner.pending = Some(Self::spawn_timer(
            Arc::downgrade(&self.inner),
            epoch,
            interval,
            callback,
        ));
        true
    }

    /// Cancel the pending deadline without rescheduling
    pub fn disarm(&self) {
        let mut inner = self.inner.lock();
        inner.cancel_pending();
        inner.armed = None;
        trace!("watchdog disarmed");
    }

    /// Whether a firing is currently scheduled
    pub fn is_armed(&self) -> bool {
        self.inner.lock().pending.is_some()
    }

    fn spawn_timer(
        inner: Weak<Mutex<Inner>>,
        epoch: u64,
        interval: Duration,
        callback: ExpireCallback,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;

            let Some(inner) = inner.upgrade() else {
                return;
            };
            {
                let mut guard = inner.lock();
                if guard.epoch != epoch {
                    return;
                }
                guard.epoch = guard.epoch.wrapping_add(1);
                guard.pending = None;
            }

            trace!(epoch, "watchdog expired");
            callback();
        })
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.inner.lock().cancel_pending();
    }
}
