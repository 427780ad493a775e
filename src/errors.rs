// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the camera session controller

use std::fmt;

/// Result type alias using SessionError
pub type SessionResult<T> = Result<T, SessionError>;

/// Main error type
#[derive(Debug, Clone)]
pub enum SessionError {
    /// Stream acquisition errors
    Stream(StreamError),
    /// Configuration errors
    Config(String),
    /// No tokio runtime available to drive background tasks
    Runtime(String),
    /// Error report could not be written
    Report(String),
    /// Generic error with message
    Other(String),
}

/// Why the platform refused to open a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionCause {
    /// Requested constraints cannot be satisfied by the device
    Overconstrained {
        /// Constraint the platform rejected (e.g. "width")
        constraint: String,
    },
    /// Device exists but could not be read (busy, hardware fault)
    NotReadable,
    /// User or policy denied camera access
    PermissionDenied,
    /// Device disappeared before it could be opened
    NotFound,
    /// Open was aborted by the platform
    Aborted,
    /// Anything else the platform reported
    Other(String),
}

impl AcquisitionCause {
    /// Platform-style error name used in reports
    pub fn name(&self) -> &str {
        match self {
            AcquisitionCause::Overconstrained { .. } => "OverconstrainedError",
            AcquisitionCause::NotReadable => "NotReadableError",
            AcquisitionCause::PermissionDenied => "NotAllowedError",
            AcquisitionCause::NotFound => "NotFoundError",
            AcquisitionCause::Aborted => "AbortError",
            AcquisitionCause::Other(name) => name,
        }
    }
}

/// Stream acquisition failure for a specific device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    /// Device the open was attempted on
    pub device_id: String,
    /// Underlying platform cause
    pub cause: AcquisitionCause,
}

impl StreamError {
    pub fn new(device_id: impl Into<String>, cause: AcquisitionCause) -> Self {
        Self {
            device_id: device_id.into(),
            cause,
        }
    }

    /// Platform error name (e.g. "NotReadableError")
    pub fn name(&self) -> &str {
        self.cause.name()
    }
}

/// Control-flow marker: the app became suspended while the selector was
/// iterating candidates. Never reported, never shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendedDuringAttempt;

/// Failure raised by a registered camera observer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObserverError {
    /// Observer returned an error
    Failed(String),
    /// Observer panicked
    Panicked(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Stream(e) => write!(f, "Stream error: {}", e),
            SessionError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SessionError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
            SessionError::Report(msg) => write!(f, "Error report failed: {}", msg),
            SessionError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for AcquisitionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionCause::Overconstrained { constraint } => {
                write!(f, "constraint '{}' cannot be satisfied", constraint)
            }
            AcquisitionCause::NotReadable => write!(f, "device could not be read"),
            AcquisitionCause::PermissionDenied => write!(f, "camera access denied"),
            AcquisitionCause::NotFound => write!(f, "device not found"),
            AcquisitionCause::Aborted => write!(f, "open aborted"),
            AcquisitionCause::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on device {}: {}",
            self.cause.name(),
            self.device_id,
            self.cause
        )
    }
}

impl fmt::Display for SuspendedDuringAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Suspended during reconfiguration attempt")
    }
}

impl fmt::Display for ObserverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverError::Failed(msg) => write!(f, "Observer failed: {}", msg),
            ObserverError::Panicked(msg) => write!(f, "Observer panicked: {}", msg),
        }
    }
}

impl std::error::Error for SessionError {}
impl std::error::Error for StreamError {}
impl std::error::Error for SuspendedDuringAttempt {}
impl std::error::Error for ObserverError {}

impl From<StreamError> for SessionError {
    fn from(err: StreamError) -> Self {
        SessionError::Stream(err)
    }
}

impl From<String> for SessionError {
    fn from(msg: String) -> Self {
        SessionError::Other(msg)
    }
}

impl From<&str> for SessionError {
    fn from(msg: &str) -> Self {
        SessionError::Other(msg.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Config(err.to_string())
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Report(err.to_string())
    }
}

impl From<String> for ObserverError {
    fn from(msg: String) -> Self {
        ObserverError::Failed(msg)
    }
}

impl From<&str> for ObserverError {
    fn from(msg: &str) -> Self {
        ObserverError::Failed(msg.to_string())
    }
}

/// Extract a readable message from a caught panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
