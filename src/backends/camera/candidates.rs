// SPDX-License-Identifier: GPL-3.0-only

//! Candidate ordering per capture mode
//!
//! Turns the formats a device advertises into an ordered list of
//! [`CandidateStream`]s. The session controller tries them strictly in the
//! order produced here and never re-sorts.

use super::CaptureModeStrategy;
use super::types::{
    CameraDevice, CandidateStream, CaptureMode, Resolution, StreamConstraints, SupportedFormat,
};
use crate::constants::{PREFERRED_MAX_FPS, PREFERRED_MIN_FPS, SCAN_TARGET_RESOLUTION, VIDEO_MIN_FPS};
use std::collections::{HashMap, HashSet};

/// Unique resolutions, largest first
fn resolutions_by_size(formats: &[SupportedFormat]) -> Vec<Resolution> {
    let mut seen = HashSet::new();
    let mut resolutions: Vec<Resolution> = formats
        .iter()
        .map(|f| f.resolution)
        .filter(|r| seen.insert(*r))
        .collect();
    resolutions.sort_by(|a, b| b.pixels().cmp(&a.pixels()));
    resolutions
}

fn framerates_for(formats: &[SupportedFormat], resolution: Resolution) -> Vec<u32> {
    formats
        .iter()
        .filter(|f| f.resolution == resolution)
        .filter_map(|f| f.framerate)
        .collect()
}

/// Preview framerate for photo mode
///
/// Prefer the highest rate within 30-60 fps; otherwise the highest
/// available; None when the platform reports no rates.
fn photo_preview_fps(rates: &[u32]) -> Option<u32> {
    rates
        .iter()
        .copied()
        .filter(|fps| (PREFERRED_MIN_FPS..=PREFERRED_MAX_FPS).contains(fps))
        .max()
        .or_else(|| rates.iter().copied().max())
}

/// Video framerate: 60 if available, else the highest below 60, else the
/// closest above 60
fn video_fps(rates: &[u32]) -> Option<u32> {
    rates.iter().copied().min_by_key(|fps| {
        if *fps == PREFERRED_MAX_FPS {
            0
        } else if *fps < PREFERRED_MAX_FPS {
            PREFERRED_MAX_FPS - fps
        } else {
            (fps - PREFERRED_MAX_FPS).saturating_add(1000)
        }
    })
}

fn candidate(device: &CameraDevice, resolution: Resolution, fps: Option<u32>) -> CandidateStream {
    CandidateStream {
        capture_resolution: resolution,
        preview_constraints: StreamConstraints {
            device_id: device.device_id.clone(),
            resolution,
            framerate: fps,
        },
    }
}

/// Photo mode: largest capture resolution first
pub fn photo_candidates(device: &CameraDevice, formats: &[SupportedFormat]) -> Vec<CandidateStream> {
    resolutions_by_size(formats)
        .into_iter()
        .map(|res| candidate(device, res, photo_preview_fps(&framerates_for(formats, res))))
        .collect()
}

/// Video mode: largest resolution with at least 25 fps first
///
/// Falls back to photo ordering when no format reaches 25 fps.
pub fn video_candidates(device: &CameraDevice, formats: &[SupportedFormat]) -> Vec<CandidateStream> {
    let mut groups: HashMap<Resolution, Vec<u32>> = HashMap::new();
    for format in formats {
        if let Some(fps) = format.framerate.filter(|fps| *fps >= VIDEO_MIN_FPS) {
            groups.entry(format.resolution).or_default().push(fps);
        }
    }

    if groups.is_empty() {
        return photo_candidates(device, formats);
    }

    let mut resolutions: Vec<Resolution> = groups.keys().copied().collect();
    resolutions.sort_by(|a, b| b.pixels().cmp(&a.pixels()));
    resolutions
        .into_iter()
        .map(|res| candidate(device, res, video_fps(&groups[&res])))
        .collect()
}

/// Scan mode: resolutions nearest 1080p first, larger wins ties
pub fn scan_candidates(device: &CameraDevice, formats: &[SupportedFormat]) -> Vec<CandidateStream> {
    let target = SCAN_TARGET_RESOLUTION.pixels();
    let mut resolutions = resolutions_by_size(formats);
    // Stable sort keeps the larger resolution first on equal distance
    resolutions.sort_by_key(|res| res.pixels().abs_diff(target));
    resolutions
        .into_iter()
        .map(|res| candidate(device, res, photo_preview_fps(&framerates_for(formats, res))))
        .collect()
}

/// Capture-mode strategy backed by a static format table
#[derive(Debug, Clone)]
pub struct FormatStrategy {
    mode: CaptureMode,
    default_formats: Vec<SupportedFormat>,
    device_formats: HashMap<String, Vec<SupportedFormat>>,
    unsupported: HashSet<String>,
}

impl FormatStrategy {
    /// Strategy for `mode` where every device advertises `formats`
    pub fn new(mode: CaptureMode, formats: Vec<SupportedFormat>) -> Self {
        Self {
            mode,
            default_formats: formats,
            device_formats: HashMap::new(),
            unsupported: HashSet::new(),
        }
    }

    /// Override the formats of one device
    pub fn with_device_formats(mut self, device_id: &str, formats: Vec<SupportedFormat>) -> Self {
        self.device_formats.insert(device_id.to_string(), formats);
        self
    }

    /// Mark a device as unusable in this mode
    pub fn without_device(mut self, device_id: &str) -> Self {
        self.unsupported.insert(device_id.to_string());
        self
    }

    /// Typical webcam format table
    pub fn common_formats() -> Vec<SupportedFormat> {
        vec![
            SupportedFormat::new(640, 480, Some(30)),
            SupportedFormat::new(1280, 720, Some(30)),
            SupportedFormat::new(1280, 720, Some(60)),
            SupportedFormat::new(1920, 1080, Some(30)),
            SupportedFormat::new(2592, 1944, Some(15)),
        ]
    }

    /// One strategy per mode sharing the same format table
    pub fn all_modes(formats: Vec<SupportedFormat>) -> Vec<FormatStrategy> {
        CaptureMode::ALL
            .iter()
            .map(|mode| FormatStrategy::new(*mode, formats.clone()))
            .collect()
    }

    fn formats_for(&self, device: &CameraDevice) -> &[SupportedFormat] {
        self.device_formats
            .get(&device.device_id)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_formats)
    }
}

impl CaptureModeStrategy for FormatStrategy {
    fn mode(&self) -> CaptureMode {
        self.mode
    }

    fn is_supported(&self, device: &CameraDevice) -> bool {
        !self.unsupported.contains(&device.device_id) && !self.formats_for(device).is_empty()
    }

    fn resolution_candidates(&self, device: &CameraDevice) -> Vec<CandidateStream> {
        let formats = self.formats_for(device);
        match self.mode {
            CaptureMode::Photo => photo_candidates(device, formats),
            CaptureMode::Video => video_candidates(device, formats),
            CaptureMode::Scan => scan_candidates(device, formats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::types::Facing;

    fn device() -> CameraDevice {
        CameraDevice::new("cam", Facing::User)
    }

    fn resolutions(candidates: &[CandidateStream]) -> Vec<(u32, u32)> {
        candidates
            .iter()
            .map(|c| (c.capture_resolution.width, c.capture_resolution.height))
            .collect()
    }

    #[test]
    fn test_photo_orders_by_size() {
        let candidates = photo_candidates(&device(), &FormatStrategy::common_formats());
        assert_eq!(
            resolutions(&candidates),
            vec![(2592, 1944), (1920, 1080), (1280, 720), (640, 480)]
        );
    }

    #[test]
    fn test_photo_preview_prefers_30_60_fps() {
        let formats = vec![
            SupportedFormat::new(1280, 720, Some(15)),
            SupportedFormat::new(1280, 720, Some(60)),
            SupportedFormat::new(1280, 720, Some(120)),
        ];
        let candidates = photo_candidates(&device(), &formats);
        assert_eq!(candidates[0].preview_constraints.framerate, Some(60));
    }

    #[test]
    fn test_photo_preview_falls_back_to_highest_fps() {
        let formats = vec![
            SupportedFormat::new(2592, 1944, Some(5)),
            SupportedFormat::new(2592, 1944, Some(15)),
        ];
        let candidates = photo_candidates(&device(), &formats);
        assert_eq!(candidates[0].preview_constraints.framerate, Some(15));
    }

    #[test]
    fn test_video_skips_slow_resolutions() {
        let candidates = video_candidates(&device(), &FormatStrategy::common_formats());
        // 2592x1944 only reaches 15 fps
        assert_eq!(
            resolutions(&candidates),
            vec![(1920, 1080), (1280, 720), (640, 480)]
        );
        assert_eq!(candidates[1].preview_constraints.framerate, Some(60));
    }

    #[test]
    fn test_video_falls_back_when_nothing_reaches_25_fps() {
        let formats = vec![SupportedFormat::new(1920, 1080, Some(10))];
        let candidates = video_candidates(&device(), &formats);
        assert_eq!(resolutions(&candidates), vec![(1920, 1080)]);
    }

    #[test]
    fn test_video_fps_handles_extreme_rates() {
        assert_eq!(video_fps(&[30, u32::MAX]), Some(30));
        assert_eq!(video_fps(&[u32::MAX, 120]), Some(120));
        assert_eq!(video_fps(&[u32::MAX]), Some(u32::MAX));
    }

    #[test]
    fn test_scan_prefers_1080p() {
        let candidates = scan_candidates(&device(), &FormatStrategy::common_formats());
        assert_eq!(candidates[0].capture_resolution, Resolution::new(1920, 1080));
        assert_eq!(
            resolutions(&candidates),
            vec![(1920, 1080), (1280, 720), (640, 480), (2592, 1944)]
        );
    }

    #[test]
    fn test_strategy_support() {
        let strategy = FormatStrategy::new(CaptureMode::Scan, FormatStrategy::common_formats())
            .without_device("front")
            .with_device_formats("empty", vec![]);
        assert!(!strategy.is_supported(&CameraDevice::new("front", Facing::User)));
        assert!(!strategy.is_supported(&CameraDevice::new("empty", Facing::User)));
        assert!(strategy.is_supported(&CameraDevice::new("back", Facing::Environment)));
    }
}
