// SPDX-License-Identifier: GPL-3.0-only

//! Device, mode and candidate selection
//!
//! The selector walks devices in preference order, modes in priority order
//! and candidates in the exact order the capture strategy returned them,
//! stopping at the first candidate the stream handle accepts.
//!
//! Suspension is checked live before every open. An open that was already
//! running when the app got suspended is allowed to finish, but its stream is
//! closed again and the whole loop aborts with [`SuspendedDuringAttempt`].

use super::observers::ObserverRegistry;
use super::suspend::SuspendAggregator;
use super::surface::{ErrorKind, ErrorReporter, ErrorSeverity, HardwareFailure};
use crate::backends::camera::{
    CameraConfig, CameraDevice, CandidateStream, CaptureMode, CaptureModeStrategy, Facing,
    StreamHandle, StreamInfo,
};
use crate::errors::SuspendedDuringAttempt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What the caller asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePreference {
    /// Previously active or explicitly selected device
    pub device_id: Option<String>,
    /// Requested facing; `None` allows any device
    pub facing: Option<Facing>,
    /// Mode tried first on every device
    pub mode: CaptureMode,
}

impl Default for DevicePreference {
    fn default() -> Self {
        Self {
            device_id: None,
            facing: None,
            mode: CaptureMode::Photo,
        }
    }
}

impl DevicePreference {
    fn allows(&self, device: &CameraDevice) -> bool {
        self.facing.is_none_or(|facing| facing == device.facing)
    }
}

/// Outcome of a successful selection
#[derive(Debug, Clone)]
pub struct Selection {
    pub config: CameraConfig,
    pub info: StreamInfo,
    pub candidate: CandidateStream,
    /// Generation of the opened stream
    pub generation: u64,
    /// Pan-tilt-zoom support queried after the open
    pub ptz: bool,
}

/// Order devices for one reconfiguration
///
/// The first device is the previously active one if it is still present and
/// allowed by the requested facing, else the first device matching the
/// facing, else the first enumerated device. The rest follow in enumeration
/// order.
pub fn order_devices(devices: &[CameraDevice], preference: &DevicePreference) -> Vec<CameraDevice> {
    let previous = preference.device_id.as_deref().and_then(|id| {
        devices
            .iter()
            .position(|d| d.device_id == id && preference.allows(d))
    });
    let first = previous
        .or_else(|| {
            preference
                .facing
                .and_then(|facing| devices.iter().position(|d| d.facing == facing))
        })
        .or(if devices.is_empty() { None } else { Some(0) });

    let Some(first) = first else {
        return Vec::new();
    };

    let mut ordered = Vec::with_capacity(devices.len());
    ordered.push(devices[first].clone());
    ordered.extend(
        devices
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != first)
            .map(|(_, device)| device.clone()),
    );
    ordered
}

/// Drives the stream handle through devices, modes and candidates
pub struct ModeSelector {
    strategies: Vec<Arc<dyn CaptureModeStrategy>>,
    mode_priority: Vec<CaptureMode>,
    stream: Arc<StreamHandle>,
    suspend: Arc<SuspendAggregator>,
    observers: Arc<ObserverRegistry>,
    reporter: Arc<dyn ErrorReporter>,
}

impl ModeSelector {
    pub fn new(
        strategies: Vec<Arc<dyn CaptureModeStrategy>>,
        mode_priority: Vec<CaptureMode>,
        stream: Arc<StreamHandle>,
        suspend: Arc<SuspendAggregator>,
        observers: Arc<ObserverRegistry>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            strategies,
            mode_priority,
            stream,
            suspend,
            observers,
            reporter,
        }
    }

    fn strategy_for(&self, mode: CaptureMode) -> Option<&Arc<dyn CaptureModeStrategy>> {
        self.strategies.iter().find(|s| s.mode() == mode)
    }

    /// Modes the device can be used in, preferred mode first
    pub fn supported_modes(&self, device: &CameraDevice, preferred: CaptureMode) -> Vec<CaptureMode> {
        CaptureMode::preference_order(preferred, &self.mode_priority)
            .into_iter()
            .filter(|mode| {
                self.strategy_for(*mode)
                    .is_some_and(|strategy| strategy.is_supported(device))
            })
            .collect()
    }

    /// Try every device in preference order
    ///
    /// # Returns
    /// * `Ok(Some(selection))` - A stream is open
    /// * `Ok(None)` - Every device, mode and candidate failed
    /// * `Err(SuspendedDuringAttempt)` - The app got suspended; no stream is open
    pub async fn select(
        &self,
        devices: &[CameraDevice],
        preference: &DevicePreference,
    ) -> Result<Option<Selection>, SuspendedDuringAttempt> {
        let ordered = order_devices(devices, preference);
        if ordered.is_empty() {
            warn!("No camera devices found");
            return Ok(None);
        }

        for device in &ordered {
            if let Some(selection) = self.try_device(device, preference.mode).await? {
                return Ok(Some(selection));
            }
        }

        warn!(devices = ordered.len(), "No device could be opened");
        Ok(None)
    }

    /// Try one device across its supported modes
    pub async fn try_device(
        &self,
        device: &CameraDevice,
        preferred: CaptureMode,
    ) -> Result<Option<Selection>, SuspendedDuringAttempt> {
        let modes = self.supported_modes(device, preferred);
        if modes.is_empty() {
            debug!(device_id = %device.device_id, "Device supports no capture mode");
            return Ok(None);
        }

        for mode in modes {
            let Some(strategy) = self.strategy_for(mode) else {
                continue;
            };
            let candidates = strategy.resolution_candidates(device);
            if candidates.is_empty() {
                debug!(device_id = %device.device_id, %mode, "No candidates");
                continue;
            }

            let config = CameraConfig {
                device_id: device.device_id.clone(),
                facing: device.facing,
                mode,
            };
            self.observers.trying_new_config(&config).await;

            for candidate in candidates {
                if self.suspend.should_suspend() {
                    debug!(device_id = %device.device_id, "Suspended before open");
                    return Err(SuspendedDuringAttempt);
                }

                debug!(
                    device_id = %device.device_id,
                    %mode,
                    resolution = %candidate.capture_resolution,
                    "Trying candidate"
                );

                match self.stream.open(&candidate.preview_constraints).await {
                    Ok(opened) => {
                        if self.suspend.should_suspend() {
                            info!(device_id = %device.device_id, "Suspended during open, discarding stream");
                            self.stream.close().await;
                            return Err(SuspendedDuringAttempt);
                        }

                        let ptz = self.stream.query_ptz().await;
                        let facing = match opened.info.facing {
                            Facing::Unknown => device.facing,
                            facing => facing,
                        };
                        return Ok(Some(Selection {
                            config: CameraConfig { facing, ..config },
                            info: opened.info,
                            candidate,
                            generation: opened.generation,
                            ptz,
                        }));
                    }
                    Err(error) => {
                        warn!(
                            device_id = %device.device_id,
                            %mode,
                            error_name = error.name(),
                            "Candidate rejected: {}",
                            error
                        );
                        self.reporter.report(
                            ErrorKind::StartCameraFailed,
                            ErrorSeverity::Error,
                            &HardwareFailure {
                                facing: device.facing,
                                mode: Some(mode),
                                error,
                            },
                        );
                    }
                }
            }
        }

        Ok(None)
    }
}

impl std::fmt::Debug for ModeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeSelector")
            .field("strategies", &self.strategies.len())
            .field("mode_priority", &self.mode_priority)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::candidates::FormatStrategy;
    use crate::backends::camera::simulated::{PlatformEvent, SimulatedPlatform};
    use crate::backends::camera::{Resolution, SupportedFormat};
    use crate::errors::AcquisitionCause;
    use crate::session::suspend::Signal;
    use std::sync::Mutex;
    use std::time::Duration;

    fn devices(ids: &[(&str, Facing)]) -> Vec<CameraDevice> {
        ids.iter()
            .map(|(id, facing)| CameraDevice::new(*id, *facing))
            .collect()
    }

    fn ids(devices: &[CameraDevice]) -> Vec<&str> {
        devices.iter().map(|d| d.device_id.as_str()).collect()
    }

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<(ErrorKind, String, Facing)>>,
    }

    impl ErrorReporter for RecordingReporter {
        fn report(&self, kind: ErrorKind, _severity: ErrorSeverity, failure: &HardwareFailure) {
            self.reports.lock().unwrap().push((
                kind,
                failure.error_name().to_string(),
                failure.facing,
            ));
        }
    }

    struct Fixture {
        platform: SimulatedPlatform,
        suspend: Arc<SuspendAggregator>,
        reporter: Arc<RecordingReporter>,
        selector: ModeSelector,
    }

    fn fixture(strategies: Vec<FormatStrategy>) -> Fixture {
        let platform = SimulatedPlatform::new(devices(&[
            ("front", Facing::User),
            ("back", Facing::Environment),
        ]));
        let (stream, _lost) = StreamHandle::new(Arc::new(platform.clone()), Duration::from_millis(100));
        let suspend = Arc::new(SuspendAggregator::new());
        let reporter = Arc::new(RecordingReporter::default());
        let selector = ModeSelector::new(
            strategies
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn CaptureModeStrategy>)
                .collect(),
            CaptureMode::ALL.to_vec(),
            Arc::new(stream),
            Arc::clone(&suspend),
            Arc::new(ObserverRegistry::new()),
            reporter.clone(),
        );
        Fixture {
            platform,
            suspend,
            reporter,
            selector,
        }
    }

    fn two_formats() -> Vec<SupportedFormat> {
        vec![
            SupportedFormat::new(1920, 1080, Some(30)),
            SupportedFormat::new(1280, 720, Some(30)),
        ]
    }

    #[test]
    fn test_order_prefers_previous_device() {
        let list = devices(&[("a", Facing::User), ("b", Facing::Environment), ("c", Facing::User)]);
        let preference = DevicePreference {
            device_id: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(ids(&order_devices(&list, &preference)), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_order_previous_device_must_match_facing() {
        let list = devices(&[("a", Facing::User), ("b", Facing::Environment), ("c", Facing::User)]);
        let preference = DevicePreference {
            device_id: Some("b".into()),
            facing: Some(Facing::User),
            ..Default::default()
        };
        assert_eq!(ids(&order_devices(&list, &preference)), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_order_falls_back_to_facing_then_first() {
        let list = devices(&[("a", Facing::User), ("b", Facing::Environment)]);
        let facing = DevicePreference {
            device_id: Some("gone".into()),
            facing: Some(Facing::Environment),
            ..Default::default()
        };
        assert_eq!(ids(&order_devices(&list, &facing)), vec!["b", "a"]);

        let external = DevicePreference {
            facing: Some(Facing::External),
            ..Default::default()
        };
        assert_eq!(ids(&order_devices(&list, &external)), vec!["a", "b"]);
        assert!(order_devices(&[], &external).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidates_tried_in_order_until_success() {
        let f = fixture(FormatStrategy::all_modes(two_formats()));
        f.platform.fail_next_opens(
            "front",
            1,
            AcquisitionCause::Overconstrained {
                constraint: "width".into(),
            },
        );

        let selection = f
            .selector
            .select(&f.platform.devices(), &DevicePreference::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(selection.config.device_id, "front");
        assert_eq!(selection.config.mode, CaptureMode::Photo);
        assert_eq!(selection.candidate.capture_resolution, Resolution::new(1280, 720));
        assert_eq!(
            *f.reporter.reports.lock().unwrap(),
            vec![(
                ErrorKind::StartCameraFailed,
                "OverconstrainedError".to_string(),
                Facing::User
            )]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_through_to_next_device() {
        let f = fixture(FormatStrategy::all_modes(two_formats()));
        // Two candidates in each of three modes
        f.platform.fail_next_opens("front", 6, AcquisitionCause::NotReadable);

        let selection = f
            .selector
            .select(&f.platform.devices(), &DevicePreference::default())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(selection.config.device_id, "back");
        assert_eq!(selection.config.facing, Facing::Environment);
        assert_eq!(f.reporter.reports.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_mode_is_skipped() {
        let f = fixture(vec![
            FormatStrategy::new(CaptureMode::Photo, two_formats()).without_device("front"),
            FormatStrategy::new(CaptureMode::Video, two_formats()),
        ]);

        let selection = f
            .selector
            .try_device(&CameraDevice::new("front", Facing::User), CaptureMode::Photo)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(selection.config.mode, CaptureMode::Video);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_before_candidate_aborts() {
        let f = fixture(FormatStrategy::all_modes(two_formats()));
        f.suspend.update_signal(Signal::Locked, true);

        let result = f
            .selector
            .select(&f.platform.devices(), &DevicePreference::default())
            .await;

        assert_eq!(result.unwrap_err(), SuspendedDuringAttempt);
        assert!(f.platform.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_between_candidates_stops_opening() {
        let f = fixture(FormatStrategy::all_modes(two_formats()));
        f.platform.fail_next_opens("front", 1, AcquisitionCause::NotReadable);
        let suspend = Arc::clone(&f.suspend);
        f.platform.set_open_hook(Box::new(move |_| {
            suspend.update_signal(Signal::Minimized, true);
        }));

        let result = f
            .selector
            .select(&f.platform.devices(), &DevicePreference::default())
            .await;

        assert_eq!(result.unwrap_err(), SuspendedDuringAttempt);
        let opens = f
            .platform
            .events()
            .into_iter()
            .filter(|e| matches!(e, PlatformEvent::OpenStarted { .. }))
            .count();
        assert_eq!(opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_opened_while_suspending_is_discarded() {
        let f = fixture(FormatStrategy::all_modes(two_formats()));
        let suspend = Arc::clone(&f.suspend);
        f.platform.set_open_hook(Box::new(move |_| {
            suspend.update_signal(Signal::ExplicitSuspend, true);
        }));

        let result = f
            .selector
            .select(&f.platform.devices(), &DevicePreference::default())
            .await;

        assert_eq!(result.unwrap_err(), SuspendedDuringAttempt);
        assert_eq!(f.platform.open_count(), 1);
        assert_eq!(f.platform.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queries_ptz_after_open() {
        let f = fixture(FormatStrategy::all_modes(two_formats()));
        f.platform.set_ptz("front", true);

        let selection = f
            .selector
            .select(&f.platform.devices(), &DevicePreference::default())
            .await
            .unwrap()
            .unwrap();
        assert!(selection.ptz);
    }
}
