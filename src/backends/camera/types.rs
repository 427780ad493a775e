// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for camera backends and the session controller

use serde::{Deserialize, Serialize};

/// Logical camera orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Facing {
    /// Facing the user (front camera)
    User,
    /// Facing away from the user (back camera)
    Environment,
    /// External or USB camera
    External,
    /// Platform did not report a facing
    #[default]
    Unknown,
}

impl Facing {
    /// Parse a facing from a short name ("user", "front", "env", "back", "external", "usb")
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "user" | "front" => Some(Facing::User),
            "environment" | "env" | "back" => Some(Facing::Environment),
            "external" | "usb" => Some(Facing::External),
            "unknown" => Some(Facing::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Facing::User => write!(f, "user"),
            Facing::Environment => write!(f, "environment"),
            Facing::External => write!(f, "external"),
            Facing::Unknown => write!(f, "unknown"),
        }
    }
}

/// Capture modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    #[default]
    Photo,
    Video,
    /// Document scanning
    Scan,
}

impl CaptureMode {
    /// All modes in static priority order
    pub const ALL: [CaptureMode; 3] = [CaptureMode::Photo, CaptureMode::Video, CaptureMode::Scan];

    /// Mode order for one reconfiguration: the caller's intent first, then
    /// the rest of `priority` without duplicates.
    pub fn preference_order(preferred: CaptureMode, priority: &[CaptureMode]) -> Vec<CaptureMode> {
        let mut order = vec![preferred];
        for mode in priority.iter().chain(Self::ALL.iter()) {
            if !order.contains(mode) {
                order.push(*mode);
            }
        }
        order
    }
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Photo => write!(f, "photo"),
            CaptureMode::Video => write!(f, "video"),
            CaptureMode::Scan => write!(f, "scan"),
        }
    }
}

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total pixel count
    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Represents a camera device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraDevice {
    /// Stable platform device id
    pub device_id: String,
    /// Human readable label
    pub label: String,
    pub facing: Facing,
}

impl CameraDevice {
    pub fn new(device_id: impl Into<String>, facing: Facing) -> Self {
        let device_id = device_id.into();
        Self {
            label: device_id.clone(),
            device_id,
            facing,
        }
    }
}

/// One format a device advertises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedFormat {
    pub resolution: Resolution,
    /// None when the platform reports no framerate (still capture)
    pub framerate: Option<u32>,
}

impl SupportedFormat {
    pub fn new(width: u32, height: u32, framerate: Option<u32>) -> Self {
        Self {
            resolution: Resolution::new(width, height),
            framerate,
        }
    }
}

impl std::fmt::Display for SupportedFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(fps) = self.framerate {
            write!(f, "{} @ {}fps", self.resolution, fps)
        } else {
            write!(f, "{}", self.resolution)
        }
    }
}

/// Platform stream constraints for the preview stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    pub device_id: String,
    pub resolution: Resolution,
    pub framerate: Option<u32>,
}

impl std::fmt::Display for StreamConstraints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.framerate {
            Some(fps) => write!(f, "{} {} @ {}fps", self.device_id, self.resolution, fps),
            None => write!(f, "{} {}", self.device_id, self.resolution),
        }
    }
}

/// One resolution/constraint combination considered during selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateStream {
    /// Resolution used for the actual capture (photo/video/scan output)
    pub capture_resolution: Resolution,
    /// Constraints used to open the preview stream
    pub preview_constraints: StreamConstraints,
}

/// Metadata of an opened stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub device_id: String,
    pub facing: Facing,
    pub resolution: Resolution,
    /// USB vendor:product id for external cameras
    pub usb_id: Option<String>,
}

/// Currently realized configuration
///
/// Handed to observers as an immutable snapshot; a successful
/// reconfiguration replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    pub device_id: String,
    pub facing: Facing,
    pub mode: CaptureMode,
}

impl std::fmt::Display for CameraConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) {}", self.device_id, self.facing, self.mode)
    }
}
