// SPDX-License-Identifier: GPL-3.0-only

//! Camera backend abstraction
//!
//! The session controller never talks to hardware directly. Everything it
//! needs from the platform goes through the traits in this module:
//!
//! ```text
//! ┌──────────────────────┐
//! │  CameraController    │  ← serialization, watchdog, availability
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │    StreamHandle      │  ← one open stream, polling monitor
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐   ┌────────────────────┐
//! │   CameraPlatform     │   │  DeviceEnumerator  │
//! └──────────────────────┘   └────────────────────┘
//! ```
//!
//! [`simulated`] provides in-process implementations used by the CLI and
//! the test suite.

pub mod candidates;
pub mod monitor;
pub mod simulated;
pub mod stream;
pub mod types;

pub use stream::{EndedSignal, FrameWait, OpenedStream, StreamHandle, StreamLost};
pub use types::*;

use crate::errors::StreamError;
use futures::future::BoxFuture;

/// Callback invoked when the device list changes
pub type DeviceChangeCallback = Box<dyn Fn() + Send + Sync>;

/// Platform stream factory
pub trait CameraPlatform: Send + Sync {
    /// Request a new hardware stream with the given constraints
    ///
    /// # Returns
    /// * `Ok(stream)` - Stream opened; the caller owns it until `stop()`
    /// * `Err(StreamError)` - Platform refused the constraints or the device
    fn open<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, Result<Box<dyn PlatformStream>, StreamError>>;
}

/// One open platform stream
pub trait PlatformStream: Send + Sync {
    /// Metadata of the opened stream (facing, resolution, USB id)
    fn info(&self) -> StreamInfo;

    /// Whether the platform terminated the stream (track ended)
    fn is_ended(&self) -> bool;

    /// Whether at least one frame has been delivered
    fn has_frame(&self) -> bool;

    /// Query pan-tilt-zoom support
    fn supports_ptz(&self) -> BoxFuture<'_, bool>;

    /// Stop the stream and release the device
    fn stop(&self) -> BoxFuture<'_, ()>;
}

/// Device enumeration service
pub trait DeviceEnumerator: Send + Sync {
    /// Enumerate available cameras in platform order
    fn list_devices(&self) -> BoxFuture<'_, Vec<CameraDevice>>;

    /// Register a callback fired whenever the device list changes
    fn on_change(&self, callback: DeviceChangeCallback);
}

/// Per-mode capture strategy (photo, video, scan)
pub trait CaptureModeStrategy: Send + Sync {
    /// Mode this strategy drives
    fn mode(&self) -> CaptureMode;

    /// Whether the device can be used in this mode
    fn is_supported(&self, device: &CameraDevice) -> bool;

    /// Ordered candidates for the device, most preferred first
    fn resolution_candidates(&self, device: &CameraDevice) -> Vec<CandidateStream>;
}
