// SPDX-License-Identifier: GPL-3.0-only

//! Session-wide constants

use crate::backends::camera::types::{CaptureMode, Resolution};
use std::time::Duration;

/// Delay between watchdog reconfiguration attempts after a failure
pub const WATCHDOG_INTERVAL: Duration = Duration::from_millis(100);

/// Polling interval of the stream monitor
///
/// Track-ended notifications are not reliably delivered by every platform,
/// so the open stream is polled instead.
pub const STREAM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default mode priority when the caller expresses no intent
pub const DEFAULT_MODE_PRIORITY: [CaptureMode; 3] =
    [CaptureMode::Photo, CaptureMode::Video, CaptureMode::Scan];

/// Scan mode aims for a document-friendly 1080p capture
pub const SCAN_TARGET_RESOLUTION: Resolution = Resolution {
    width: 1920,
    height: 1080,
};

/// Minimum preview framerate accepted for video candidates
pub const VIDEO_MIN_FPS: u32 = 25;

/// Preferred upper framerate for photo previews and video capture
pub const PREFERRED_MAX_FPS: u32 = 60;

/// Preferred lower framerate for photo previews
pub const PREFERRED_MIN_FPS: u32 = 30;

/// Directory name under the user config dir
pub const CONFIG_DIR_NAME: &str = "camera-session";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Error report log file name under the local data dir
pub const ERROR_LOG_FILE_NAME: &str = "errors.jsonl";
