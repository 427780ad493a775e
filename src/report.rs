// SPDX-License-Identifier: GPL-3.0-only

//! Hardware error report log
//!
//! [`JsonLinesReporter`] appends one JSON object per hardware failure to a
//! log file so failures seen in the field can be attached to bug reports.

use crate::backends::camera::types::{CaptureMode, Facing};
use crate::constants::{CONFIG_DIR_NAME, ERROR_LOG_FILE_NAME};
use crate::errors::{SessionError, SessionResult};
use crate::session::surface::{ErrorKind, ErrorReporter, ErrorSeverity, HardwareFailure};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, warn};
use uuid::Uuid;

/// One line of the error log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub id: Uuid,
    /// RFC 3339 local time
    pub timestamp: String,
    pub kind: ErrorKind,
    pub severity: ErrorSeverity,
    pub device_id: String,
    pub facing: Facing,
    pub mode: Option<CaptureMode>,
    /// Platform error name (e.g. "NotReadableError")
    pub error_name: String,
    pub message: String,
    pub version: String,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, severity: ErrorSeverity, failure: &HardwareFailure) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Local::now().to_rfc3339(),
            kind,
            severity,
            device_id: failure.device_id().to_string(),
            facing: failure.facing,
            mode: failure.mode,
            error_name: failure.error_name().to_string(),
            message: failure.error.to_string(),
            version: env!("GIT_VERSION").to_string(),
        }
    }
}

/// Error reporter writing JSON lines to a file
#[derive(Debug)]
pub struct JsonLinesReporter {
    path: PathBuf,
    /// Serializes appends so lines never interleave
    write_lock: Mutex<()>,
}

impl JsonLinesReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// `<local data dir>/camera-session/errors.jsonl`, falling back to the
    /// home directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_local_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME))
            .or_else(|| dirs::home_dir().map(|home| home.join(format!(".{}", CONFIG_DIR_NAME))))
            .map(|dir| dir.join(ERROR_LOG_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one report
    pub fn append(&self, report: &ErrorReport) -> SessionResult<()> {
        let line = serde_json::to_string(report)?;
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SessionError::Report(format!("{}: {}", parent.display(), e)))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SessionError::Report(format!("{}: {}", self.path.display(), e)))?;
        writeln!(file, "{}", line)
            .map_err(|e| SessionError::Report(format!("{}: {}", self.path.display(), e)))?;

        debug!(id = %report.id, path = %self.path.display(), "Error report written");
        Ok(())
    }

    /// Read every report in the log, oldest first
    ///
    /// A missing file yields no reports; blank lines are skipped.
    pub fn read_all(path: &Path) -> SessionResult<Vec<ErrorReport>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SessionError::from))
            .collect()
    }
}

impl ErrorReporter for JsonLinesReporter {
    fn report(&self, kind: ErrorKind, severity: ErrorSeverity, failure: &HardwareFailure) {
        let report = ErrorReport::new(kind, severity, failure);
        if let Err(e) = self.append(&report) {
            warn!(error = %e, "Failed to write error report");
        }
    }
}
