// SPDX-License-Identifier: GPL-3.0-only

//! Single-stream ownership
//!
//! [`StreamHandle`] holds at most one open platform stream. Opening always
//! closes the previous stream first, closing is idempotent, and every open
//! stream is polled by a [`StreamMonitor`] that raises [`StreamLost`] when the
//! platform terminates it behind our back.

use super::monitor::{LoopAction, StreamMonitor};
use super::types::{StreamConstraints, StreamInfo};
use super::{CameraPlatform, PlatformStream};
use crate::errors::StreamError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Raised when the open stream was terminated externally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamLost {
    /// Generation of the stream that ended
    pub generation: u64,
    pub device_id: String,
}

/// Outcome of waiting for the first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameWait {
    /// The current stream delivered a frame
    Ready,
    /// The stream was closed or replaced before a frame arrived
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BarrierStatus {
    Waiting,
    Ready,
    Canceled,
}

#[derive(Debug, Clone, Copy)]
struct BarrierState {
    generation: u64,
    status: BarrierStatus,
}

/// Resolves once the stream it belongs to has ended or been closed
#[derive(Debug, Clone)]
pub struct EndedSignal {
    rx: watch::Receiver<bool>,
}

impl EndedSignal {
    /// Whether the platform reported the stream as ended
    pub fn is_ended(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the stream ends or is closed
    pub async fn wait(&mut self) {
        // Sender is dropped with the monitor, which also counts as ended
        let _ = self.rx.wait_for(|ended| *ended).await;
    }
}

/// Result of a successful open
#[derive(Debug, Clone)]
pub struct OpenedStream {
    pub info: StreamInfo,
    pub generation: u64,
    pub ended: EndedSignal,
}

struct ActiveStream {
    stream: Arc<dyn PlatformStream>,
    info: StreamInfo,
    generation: u64,
    monitor: StreamMonitor,
}

/// Owner of the single open camera stream
pub struct StreamHandle {
    platform: Arc<dyn CameraPlatform>,
    poll_interval: Duration,
    /// Held across platform open/stop so open and close never interleave
    active: tokio::sync::Mutex<Option<ActiveStream>>,
    /// Synchronous mirror of the active stream's metadata
    info: Mutex<Option<StreamInfo>>,
    generation: AtomicU64,
    barrier: Arc<watch::Sender<BarrierState>>,
    lost_tx: mpsc::UnboundedSender<StreamLost>,
}

impl StreamHandle {
    /// Create a handle and the receiver for its stream-lost events
    pub fn new(
        platform: Arc<dyn CameraPlatform>,
        poll_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<StreamLost>) {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let (barrier, _) = watch::channel(BarrierState {
            generation: 0,
            status: BarrierStatus::Canceled,
        });

        let handle = Self {
            platform,
            poll_interval,
            active: tokio::sync::Mutex::new(None),
            info: Mutex::new(None),
            generation: AtomicU64::new(0),
            barrier: Arc::new(barrier),
            lost_tx,
        };
        (handle, lost_rx)
    }

    /// Open a new stream, closing any previous one first
    pub async fn open(&self, constraints: &StreamConstraints) -> Result<OpenedStream, StreamError> {
        let mut active = self.active.lock().await;
        self.close_locked(&mut active).await;

        debug!(constraints = %constraints, "Opening stream");
        let stream: Arc<dyn PlatformStream> = Arc::from(self.platform.open(constraints).await?);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let info = stream.info();
        self.barrier.send_replace(BarrierState {
            generation,
            status: BarrierStatus::Waiting,
        });

        let (ended_tx, ended_rx) = watch::channel(false);
        let monitor = {
            let stream = Arc::clone(&stream);
            let barrier = Arc::clone(&self.barrier);
            let lost_tx = self.lost_tx.clone();
            let device_id = info.device_id.clone();
            StreamMonitor::start("stream-monitor", self.poll_interval, move || {
                if stream.is_ended() {
                    warn!(device_id = %device_id, generation, "Stream ended externally");
                    ended_tx.send_replace(true);
                    settle_barrier(&barrier, generation, BarrierStatus::Canceled);
                    let _ = lost_tx.send(StreamLost {
                        generation,
                        device_id: device_id.clone(),
                    });
                    return LoopAction::Stop;
                }
                if stream.has_frame() {
                    settle_barrier(&barrier, generation, BarrierStatus::Ready);
                }
                LoopAction::Continue
            })
        };

        info!(
            device_id = %info.device_id,
            facing = %info.facing,
            resolution = %info.resolution,
            generation,
            "Stream opened"
        );

        *self.info.lock().unwrap_or_else(PoisonError::into_inner) = Some(info.clone());
        *active = Some(ActiveStream {
            stream,
            info: info.clone(),
            generation,
            monitor,
        });

        Ok(OpenedStream {
            info,
            generation,
            ended: EndedSignal { rx: ended_rx },
        })
    }

    /// Close the open stream; no-op when nothing is open
    pub async fn close(&self) {
        let mut active = self.active.lock().await;
        self.close_locked(&mut active).await;
    }

    async fn close_locked(&self, active: &mut Option<ActiveStream>) {
        let Some(mut current) = active.take() else {
            return;
        };

        *self.info.lock().unwrap_or_else(PoisonError::into_inner) = None;
        // Also overrides Ready: a closed stream has no frame to wait for
        self.barrier.send_replace(BarrierState {
            generation: current.generation,
            status: BarrierStatus::Canceled,
        });
        current.monitor.stop().await;
        current.stream.stop().await;

        info!(
            device_id = %current.info.device_id,
            generation = current.generation,
            "Stream closed"
        );
    }

    /// Whether a stream is currently open
    pub fn is_open(&self) -> bool {
        self.info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Metadata of the open stream
    pub fn current_info(&self) -> Option<StreamInfo> {
        self.info
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Generation of the most recently opened stream
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Query PTZ support of the open stream (false when closed)
    pub async fn query_ptz(&self) -> bool {
        let stream = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(current) => Arc::clone(&current.stream),
                None => return false,
            }
        };
        stream.supports_ptz().await
    }

    /// Wait until the open stream delivers its first frame
    ///
    /// Returns `FrameWait::Canceled` if no stream is open, or if the stream is
    /// closed or replaced while waiting.
    pub async fn wait_frame_ready(&self) -> FrameWait {
        let mut rx = self.barrier.subscribe();
        let start = *rx.borrow_and_update();
        match start.status {
            BarrierStatus::Ready => return FrameWait::Ready,
            BarrierStatus::Canceled => return FrameWait::Canceled,
            BarrierStatus::Waiting => {}
        }

        let settled = rx
            .wait_for(|s| s.generation != start.generation || s.status != BarrierStatus::Waiting)
            .await
            .map(|s| *s);

        match settled {
            Ok(s) if s.generation == start.generation && s.status == BarrierStatus::Ready => {
                FrameWait::Ready
            }
            _ => FrameWait::Canceled,
        }
    }
}

/// Move the barrier of `generation` out of `Waiting`
fn settle_barrier(barrier: &watch::Sender<BarrierState>, generation: u64, status: BarrierStatus) {
    barrier.send_if_modified(|state| {
        if state.generation == generation && state.status == BarrierStatus::Waiting {
            state.status = status;
            true
        } else {
            false
        }
    });
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("open", &self.is_open())
            .field("generation", &self.generation())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::simulated::{PlatformEvent, SimulatedPlatform};
    use crate::backends::camera::types::{CameraDevice, Facing, Resolution};
    use crate::errors::AcquisitionCause;

    fn constraints(device_id: &str) -> StreamConstraints {
        StreamConstraints {
            device_id: device_id.to_string(),
            resolution: Resolution::new(1280, 720),
            framerate: Some(30),
        }
    }

    fn platform() -> Arc<SimulatedPlatform> {
        Arc::new(SimulatedPlatform::new(vec![
            CameraDevice::new("front", Facing::User),
            CameraDevice::new("back", Facing::Environment),
        ]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent() {
        let platform = platform();
        let (handle, _lost) = StreamHandle::new(platform.clone(), Duration::from_millis(100));

        handle.close().await;
        handle.open(&constraints("front")).await.unwrap();
        handle.close().await;
        handle.close().await;

        assert!(!handle.is_open());
        let closes = platform
            .events()
            .into_iter()
            .filter(|e| matches!(e, PlatformEvent::Closed { .. }))
            .count();
        assert_eq!(closes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_closes_previous_stream_first() {
        let platform = platform();
        let (handle, _lost) = StreamHandle::new(platform.clone(), Duration::from_millis(100));

        handle.open(&constraints("front")).await.unwrap();
        handle.open(&constraints("back")).await.unwrap();

        let events = platform.events();
        assert_eq!(
            events,
            vec![
                PlatformEvent::OpenStarted {
                    device_id: "front".to_string()
                },
                PlatformEvent::Opened {
                    device_id: "front".to_string()
                },
                PlatformEvent::Closed {
                    device_id: "front".to_string()
                },
                PlatformEvent::OpenStarted {
                    device_id: "back".to_string()
                },
                PlatformEvent::Opened {
                    device_id: "back".to_string()
                },
            ]
        );
        assert_eq!(handle.current_info().unwrap().device_id, "back");
        assert_eq!(handle.generation(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_failure_surfaces_cause() {
        let platform = platform();
        platform.fail_next_opens("front", 1, AcquisitionCause::NotReadable);
        let (handle, _lost) = StreamHandle::new(platform.clone(), Duration::from_millis(100));

        let err = handle.open(&constraints("front")).await.unwrap_err();
        assert_eq!(err.cause, AcquisitionCause::NotReadable);
        assert_eq!(err.device_id, "front");
        assert!(!handle.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_reports_ended_stream() {
        let platform = platform();
        let (handle, mut lost) = StreamHandle::new(platform.clone(), Duration::from_millis(100));

        let opened = handle.open(&constraints("front")).await.unwrap();
        platform.end_stream("front");

        let event = lost.recv().await.unwrap();
        assert_eq!(event.generation, opened.generation);
        assert_eq!(event.device_id, "front");
        assert!(opened.ended.is_ended());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_wait_ready_after_first_frame() {
        let platform = platform();
        let (handle, _lost) = StreamHandle::new(platform.clone(), Duration::from_millis(100));

        handle.open(&constraints("front")).await.unwrap();
        assert_eq!(handle.wait_frame_ready().await, FrameWait::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_wait_canceled_by_close() {
        let platform = platform();
        platform.set_frame_delivery("front", false);
        let handle = Arc::new(StreamHandle::new(platform.clone(), Duration::from_millis(100)).0);

        handle.open(&constraints("front")).await.unwrap();

        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.wait_frame_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.close().await;

        assert_eq!(waiter.await.unwrap(), FrameWait::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_wait_after_close_is_canceled() {
        let platform = platform();
        let (handle, _lost) = StreamHandle::new(platform.clone(), Duration::from_millis(100));

        handle.open(&constraints("front")).await.unwrap();
        assert_eq!(handle.wait_frame_ready().await, FrameWait::Ready);

        handle.close().await;
        assert!(!handle.is_open());
        assert_eq!(handle.wait_frame_ready().await, FrameWait::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_wait_without_stream_is_canceled() {
        let (handle, _lost) = StreamHandle::new(platform(), Duration::from_millis(100));
        assert_eq!(handle.wait_frame_ready().await, FrameWait::Canceled);
    }
}
