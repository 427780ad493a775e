// SPDX-License-Identifier: GPL-3.0-only
//! Polling loop lifecycle for open streams
//!
//! Platforms do not reliably deliver track-ended notifications, so every
//! open stream gets a small task that polls it at a fixed interval. This
//! module provides the start/stop handling for those tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Action returned by the monitor callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep polling
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a polling loop running as a tokio task
///
/// # Example
///
/// ```ignore
/// let monitor = StreamMonitor::start("stream-monitor", STREAM_POLL_INTERVAL, move || {
///     if stream.is_ended() {
///         notify_lost();
///         LoopAction::Stop
///     } else {
///         LoopAction::Continue
///     }
/// });
///
/// // Later, stop the loop
/// monitor.stop().await;
/// ```
pub struct StreamMonitor {
    /// Task handle for joining
    task: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Name for logging
    name: String,
}

impl StreamMonitor {
    /// Start a new polling loop
    ///
    /// `tick_fn` runs once per `interval` until it returns `LoopAction::Stop`
    /// or the monitor is stopped. Must be called from within a tokio runtime.
    pub fn start<F>(name: &str, interval: Duration, mut tick_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        debug!(name = %name, interval_ms = interval.as_millis() as u64, "Starting stream monitor");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; polling starts one interval in
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if stop_signal_clone.load(Ordering::SeqCst) {
                    debug!(name = %name_clone, "Stop signal received");
                    break;
                }

                match tick_fn() {
                    LoopAction::Continue => {}
                    LoopAction::Stop => {
                        debug!(name = %name_clone, "Monitor requested stop");
                        break;
                    }
                }
            }

            info!(name = %name_clone, "Stream monitor exiting");
        });

        Self {
            task: Some(task),
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop at its next tick (non-blocking)
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the task to finish
    pub async fn stop(&mut self) {
        self.request_stop();
        if let Some(task) = self.task.take() {
            // The loop may be parked on the ticker; do not wait a full interval
            task.abort();
            match task.await {
                Ok(()) => debug!(name = %self.name, "Stream monitor finished"),
                Err(e) if e.is_cancelled() => debug!(name = %self.name, "Stream monitor cancelled"),
                Err(e) => tracing::warn!(name = %self.name, error = %e, "Stream monitor panicked"),
            }
        }
    }
}

impl Drop for StreamMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!(name = %self.name, "StreamMonitor dropped, stopping loop");
            self.stop_signal.store(true, Ordering::SeqCst);
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let monitor = StreamMonitor::start("test-monitor", Duration::from_millis(100), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 4 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        });

        tokio::time::sleep(Duration::from_millis(1_000)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 5); // 0-4 inclusive
        assert!(!monitor.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_polls_at_interval() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut monitor = StreamMonitor::start("test-interval", Duration::from_millis(100), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            LoopAction::Continue
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        monitor.stop().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_is_running_until_dropped() {
        let monitor = StreamMonitor::start("test-running", Duration::from_millis(100), || {
            LoopAction::Continue
        });

        tokio::task::yield_now().await;
        assert!(monitor.is_running());

        // Drop will stop it
        drop(monitor);
    }
}
