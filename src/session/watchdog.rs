// SPDX-License-Identifier: GPL-3.0-only

//! Reconfiguration retry loop
//!
//! After a failed reconfiguration the watchdog retries at a fixed interval
//! until one attempt succeeds or it is cancelled. Every attempt outcome, from
//! the watchdog or from a direct caller, is recorded so others can wait for
//! the next one with [`Watchdog::wait_next_reconfigure`].

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Watchdog state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchdogState {
    #[default]
    Idle,
    /// Retrying; `attempt` counts watchdog attempts since the first failure
    Retrying { attempt: u32 },
}

#[derive(Debug, Clone, Copy, Default)]
struct Status {
    state: WatchdogState,
    /// Number of recorded attempt outcomes
    seq: u64,
    last_ok: bool,
}

/// One reconfiguration attempt run by the watchdog
pub type AttemptFn = Arc<dyn Fn() -> BoxFuture<'static, bool> + Send + Sync>;

/// Fixed-interval retry loop
pub struct Watchdog {
    interval: Duration,
    runtime: Handle,
    status: watch::Sender<Status>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    pub fn new(interval: Duration, runtime: Handle) -> Self {
        let (status, _) = watch::channel(Status::default());
        Self {
            interval,
            runtime,
            status,
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.status.borrow().state
    }

    pub fn is_active(&self) -> bool {
        self.state() != WatchdogState::Idle
    }

    /// Start retrying unless already active
    ///
    /// Returns false if the watchdog was already running.
    pub fn start(&self, attempt: AttemptFn) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_active() {
            return false;
        }

        info!(interval_ms = self.interval.as_millis() as u64, "Starting reconfiguration watchdog");
        self.status
            .send_modify(|s| s.state = WatchdogState::Retrying { attempt: 0 });

        let status = self.status.clone();
        let interval = self.interval;
        *task = Some(self.runtime.spawn(async move {
            let mut count = 0u32;
            loop {
                tokio::time::sleep(interval).await;
                count = count.saturating_add(1);
                status.send_modify(|s| {
                    if s.state != WatchdogState::Idle {
                        s.state = WatchdogState::Retrying { attempt: count };
                    }
                });
                debug!(attempt = count, "Watchdog retrying reconfiguration");

                if attempt().await {
                    info!(attempts = count, "Watchdog recovered the camera");
                    break;
                }
            }
            status.send_modify(|s| s.state = WatchdogState::Idle);
        }));
        true
    }

    /// Stop retrying; no-op when idle
    pub fn cancel(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.status.send_if_modified(|s| {
            let was_active = s.state != WatchdogState::Idle;
            s.state = WatchdogState::Idle;
            was_active
        });
        if let Some(task) = task {
            debug!("Watchdog cancelled");
            task.abort();
        }
    }

    /// Record the outcome of a reconfiguration attempt
    pub fn record_outcome(&self, ok: bool) {
        self.status.send_modify(|s| {
            s.seq += 1;
            s.last_ok = ok;
        });
    }

    /// Outcome of the most recent attempt (false before any attempt)
    pub fn last_outcome(&self) -> bool {
        self.status.borrow().last_ok
    }

    /// Wait for the next recorded attempt outcome
    ///
    /// Returns immediately with the last outcome when the watchdog is idle,
    /// or as soon as it becomes idle, so a caller never waits on a loop that
    /// has already stopped.
    pub async fn wait_next_reconfigure(&self) -> bool {
        let mut rx = self.status.subscribe();
        let start = *rx.borrow_and_update();
        if start.state == WatchdogState::Idle {
            return start.last_ok;
        }

        match rx
            .wait_for(|s| s.seq != start.seq || s.state == WatchdogState::Idle)
            .await
        {
            Ok(status) => status.last_ok,
            Err(_) => false,
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("interval", &self.interval)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Attempt that fails `failures` times, recording every outcome
    fn flaky(watchdog: &Arc<Watchdog>, failures: u32) -> (AttemptFn, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let weak = Arc::downgrade(watchdog);
        let counter = Arc::clone(&calls);
        let attempt: AttemptFn = Arc::new(move || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let weak = weak.clone();
            async move {
                let ok = call > failures;
                if let Some(watchdog) = weak.upgrade() {
                    watchdog.record_outcome(ok);
                }
                ok
            }
            .boxed()
        });
        (attempt, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let watchdog = Arc::new(Watchdog::new(Duration::from_millis(100), Handle::current()));
        let (attempt, calls) = flaky(&watchdog, 3);

        assert!(watchdog.start(attempt.clone()));
        assert!(!watchdog.start(attempt));
        assert!(watchdog.is_active());

        tokio::time::sleep(Duration::from_millis(450)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(watchdog.state(), WatchdogState::Idle);
        assert!(watchdog.last_outcome());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_counter() {
        let watchdog = Arc::new(Watchdog::new(Duration::from_millis(100), Handle::current()));
        let (attempt, _) = flaky(&watchdog, u32::MAX);
        watchdog.start(attempt);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(watchdog.state(), WatchdogState::Retrying { attempt: 2 });

        watchdog.cancel();
        assert_eq!(watchdog.state(), WatchdogState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_next_reconfigure_sees_next_outcome() {
        let watchdog = Arc::new(Watchdog::new(Duration::from_millis(100), Handle::current()));
        let (attempt, calls) = flaky(&watchdog, 1);
        watchdog.start(attempt);

        // First watchdog attempt fails
        assert!(!watchdog.wait_next_reconfigure().await);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Second succeeds
        assert!(watchdog.wait_next_reconfigure().await);
        // Idle now, returns the last outcome without waiting
        assert!(watchdog.wait_next_reconfigure().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_releases_waiters() {
        let watchdog = Arc::new(Watchdog::new(Duration::from_secs(60), Handle::current()));
        let (attempt, calls) = flaky(&watchdog, u32::MAX);
        watchdog.start(attempt);

        let waiter = {
            let watchdog = Arc::clone(&watchdog);
            tokio::spawn(async move { watchdog.wait_next_reconfigure().await })
        };
        tokio::task::yield_now().await;
        watchdog.cancel();

        assert!(!waiter.await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
