// SPDX-License-Identifier: GPL-3.0-only

//! Outward-facing collaborators: the "no camera" warning and error reporting

use crate::backends::camera::types::{CaptureMode, Facing};
use crate::errors::StreamError;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Presentation of the persistent "no camera" warning
pub trait WarningSurface: Send + Sync {
    fn show_no_camera_warning(&self);
    fn dismiss_no_camera_warning(&self);
}

/// Category of a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Stream could not be opened with any candidate
    StartCameraFailed,
    /// Open stream was terminated by the platform
    StreamEnded,
}

/// Severity of a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Warning,
    Error,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::StartCameraFailed => write!(f, "start_camera_failed"),
            ErrorKind::StreamEnded => write!(f, "stream_ended"),
        }
    }
}

/// A hardware failure with the context needed to diagnose it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareFailure {
    pub facing: Facing,
    pub mode: Option<CaptureMode>,
    pub error: StreamError,
}

impl HardwareFailure {
    pub fn device_id(&self) -> &str {
        &self.error.device_id
    }

    /// Platform error name (e.g. "NotReadableError")
    pub fn error_name(&self) -> &str {
        self.error.name()
    }
}

/// Fire-and-forget error reporting, used for hardware failures only
pub trait ErrorReporter: Send + Sync {
    fn report(&self, kind: ErrorKind, severity: ErrorSeverity, failure: &HardwareFailure);
}

/// Reporter that writes reports to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, kind: ErrorKind, severity: ErrorSeverity, failure: &HardwareFailure) {
        match severity {
            ErrorSeverity::Error => error!(
                kind = %kind,
                device_id = failure.device_id(),
                facing = %failure.facing,
                error_name = failure.error_name(),
                "{}", failure.error
            ),
            ErrorSeverity::Warning => warn!(
                kind = %kind,
                device_id = failure.device_id(),
                facing = %failure.facing,
                error_name = failure.error_name(),
                "{}", failure.error
            ),
        }
    }
}

/// Warning surface that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWarningSurface;

impl WarningSurface for LogWarningSurface {
    fn show_no_camera_warning(&self) {
        warn!("No camera available");
    }

    fn dismiss_no_camera_warning(&self) {
        info!("Camera available again, warning dismissed");
    }
}
