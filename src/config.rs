// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::types::{CaptureMode, Facing};
use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_MODE_PRIORITY, STREAM_POLL_INTERVAL,
    WATCHDOG_INTERVAL,
};
use crate::errors::{SessionError, SessionResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Camera session configuration
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delay between watchdog retries
    pub watchdog_interval_ms: u64,
    /// Polling interval of the stream-ended monitor
    pub stream_poll_interval_ms: u64,
    /// Mode tried first on every device
    pub preferred_mode: CaptureMode,
    /// Static mode priority after the preferred mode
    pub mode_priority: Vec<CaptureMode>,
    /// Facing to prefer when no device was used before
    pub preferred_facing: Option<Facing>,
    /// Last used camera device id
    pub last_device_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: WATCHDOG_INTERVAL.as_millis() as u64,
            stream_poll_interval_ms: STREAM_POLL_INTERVAL.as_millis() as u64,
            preferred_mode: CaptureMode::Photo,
            mode_priority: DEFAULT_MODE_PRIORITY.to_vec(),
            preferred_facing: None,
            last_device_id: None,
        }
    }
}

impl Config {
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms.max(1))
    }

    pub fn stream_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stream_poll_interval_ms.max(1))
    }

    /// `<config dir>/camera-session/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from `path`, falling back to defaults when the file is missing
    pub fn load(path: &Path) -> SessionResult<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(e.into()),
        };

        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            SessionError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, or defaults if it cannot be resolved
    pub fn load_default() -> SessionResult<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> SessionResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    fn validate(&self) -> SessionResult<()> {
        if self.mode_priority.is_empty() {
            return Err(SessionError::Config(
                "mode_priority must list at least one mode".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("camera-session-config-{}-{}", std::process::id(), name))
            .join(CONFIG_FILE_NAME)
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.watchdog_interval(), Duration::from_millis(100));
        assert_eq!(config.stream_poll_interval(), Duration::from_millis(100));
        assert_eq!(
            config.mode_priority,
            vec![CaptureMode::Photo, CaptureMode::Video, CaptureMode::Scan]
        );
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load(&temp_path("missing")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let path = temp_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"preferred_mode": "scan", "preferred_facing": "environment"}"#)
            .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.preferred_mode, CaptureMode::Scan);
        assert_eq!(config.preferred_facing, Some(Facing::Environment));
        assert_eq!(config.watchdog_interval_ms, 100);

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let path = temp_path("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(Config::load(&path), Err(SessionError::Config(_))));

        std::fs::write(&path, r#"{"mode_priority": []}"#).unwrap();
        assert!(matches!(Config::load(&path), Err(SessionError::Config(_))));

        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_save_then_load() {
        let path = temp_path("save");
        let config = Config {
            last_device_id: Some("usb0".to_string()),
            watchdog_interval_ms: 250,
            ..Config::default()
        };
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
