// SPDX-License-Identifier: GPL-3.0-only

//! In-process camera platform
//!
//! Stands in for real hardware in the CLI `simulate` command and in tests.
//! Opens can be scripted to fail, slowed down, or hooked; open streams can be
//! ended externally; every platform call is recorded as a [`PlatformEvent`].

use super::types::{CameraDevice, Facing, StreamConstraints, StreamInfo};
use super::{CameraPlatform, DeviceChangeCallback, DeviceEnumerator, PlatformStream};
use crate::errors::{AcquisitionCause, StreamError};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Recorded platform interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    OpenStarted { device_id: String },
    Opened { device_id: String },
    OpenFailed { device_id: String, error_name: String },
    Closed { device_id: String },
}

/// Hook invoked when an open starts, before it resolves
pub type OpenHook = Box<dyn Fn(&StreamConstraints) + Send + Sync>;

struct DeviceScript {
    failures_remaining: u32,
    cause: AcquisitionCause,
    deliver_frames: bool,
    ptz: bool,
}

impl Default for DeviceScript {
    fn default() -> Self {
        Self {
            failures_remaining: 0,
            cause: AcquisitionCause::NotReadable,
            deliver_frames: true,
            ptz: false,
        }
    }
}

struct StreamState {
    device_id: String,
    ended: AtomicBool,
    deliver_frames: bool,
    ptz: bool,
    info: StreamInfo,
}

#[derive(Default)]
struct Shared {
    devices: Mutex<Vec<CameraDevice>>,
    scripts: Mutex<HashMap<String, DeviceScript>>,
    events: Mutex<Vec<PlatformEvent>>,
    live: Mutex<Vec<Arc<StreamState>>>,
    callbacks: Mutex<Vec<DeviceChangeCallback>>,
    open_hook: Mutex<Option<OpenHook>>,
    open_delay: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Shared {
    fn record(&self, event: PlatformEvent) {
        debug!(?event, "Simulated platform event");
        lock(&self.events).push(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated camera platform and device enumerator
#[derive(Clone)]
pub struct SimulatedPlatform {
    shared: Arc<Shared>,
}

impl SimulatedPlatform {
    /// Create a platform exposing `devices` in enumeration order
    pub fn new(devices: Vec<CameraDevice>) -> Self {
        let shared = Shared::default();
        *lock(&shared.devices) = devices;
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Parse a device list such as `"front:user,back:environment,usb0:external"`
    ///
    /// Entries without a facing default to `Facing::Unknown`.
    pub fn parse_devices(list: &str) -> Result<Vec<CameraDevice>, String> {
        list.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some((id, facing)) => Facing::from_name(facing)
                    .map(|facing| CameraDevice::new(id, facing))
                    .ok_or_else(|| format!("unknown facing '{}' for device '{}'", facing, id)),
                None => Ok(CameraDevice::new(entry, Facing::Unknown)),
            })
            .collect()
    }

    /// Current device list
    pub fn devices(&self) -> Vec<CameraDevice> {
        lock(&self.shared.devices).clone()
    }

    /// Replace the device list and fire change callbacks
    pub fn set_devices(&self, devices: Vec<CameraDevice>) {
        *lock(&self.shared.devices) = devices;
        for callback in lock(&self.shared.callbacks).iter() {
            callback();
        }
    }

    /// Make the next `count` opens of `device_id` fail with `cause`
    pub fn fail_next_opens(&self, device_id: &str, count: u32, cause: AcquisitionCause) {
        let mut scripts = lock(&self.shared.scripts);
        let script = scripts.entry(device_id.to_string()).or_default();
        script.failures_remaining = count;
        script.cause = cause;
    }

    /// Whether streams of `device_id` deliver frames
    pub fn set_frame_delivery(&self, device_id: &str, deliver: bool) {
        lock(&self.shared.scripts)
            .entry(device_id.to_string())
            .or_default()
            .deliver_frames = deliver;
    }

    /// Whether streams of `device_id` report PTZ support
    pub fn set_ptz(&self, device_id: &str, ptz: bool) {
        lock(&self.shared.scripts)
            .entry(device_id.to_string())
            .or_default()
            .ptz = ptz;
    }

    /// Delay every open by `delay`
    pub fn set_open_delay(&self, delay: Duration) {
        *lock(&self.shared.open_delay) = delay;
    }

    /// Run `hook` at the start of every open
    pub fn set_open_hook(&self, hook: OpenHook) {
        *lock(&self.shared.open_hook) = Some(hook);
    }

    /// Terminate every live stream of `device_id` as if the track ended
    pub fn end_stream(&self, device_id: &str) {
        for state in lock(&self.shared.live).iter() {
            if state.device_id == device_id {
                state.ended.store(true, Ordering::SeqCst);
            }
        }
    }

    /// All recorded events, oldest first
    pub fn events(&self) -> Vec<PlatformEvent> {
        lock(&self.shared.events).clone()
    }

    /// Number of successful opens so far
    pub fn open_count(&self) -> usize {
        lock(&self.shared.events)
            .iter()
            .filter(|e| matches!(e, PlatformEvent::Opened { .. }))
            .count()
    }

    /// Number of streams currently open
    pub fn live_streams(&self) -> usize {
        lock(&self.shared.live).len()
    }

    /// Highest number of concurrently pending opens observed
    pub fn max_concurrent_opens(&self) -> usize {
        self.shared.max_in_flight.load(Ordering::SeqCst)
    }
}

impl CameraPlatform for SimulatedPlatform {
    fn open<'a>(
        &'a self,
        constraints: &'a StreamConstraints,
    ) -> BoxFuture<'a, Result<Box<dyn PlatformStream>, StreamError>> {
        async move {
            let shared = &self.shared;
            let device_id = constraints.device_id.clone();
            shared.record(PlatformEvent::OpenStarted {
                device_id: device_id.clone(),
            });

            let pending = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            shared.max_in_flight.fetch_max(pending, Ordering::SeqCst);

            if let Some(hook) = lock(&shared.open_hook).as_ref() {
                hook(constraints);
            }

            let delay = *lock(&shared.open_delay);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            shared.in_flight.fetch_sub(1, Ordering::SeqCst);

            let device = lock(&shared.devices)
                .iter()
                .find(|d| d.device_id == device_id)
                .cloned();
            let Some(device) = device else {
                let err = StreamError::new(device_id.clone(), AcquisitionCause::NotFound);
                shared.record(PlatformEvent::OpenFailed {
                    device_id,
                    error_name: err.name().to_string(),
                });
                return Err(err);
            };

            let (deliver_frames, ptz) = {
                let mut scripts = lock(&shared.scripts);
                let script = scripts.entry(device_id.clone()).or_default();
                if script.failures_remaining > 0 {
                    script.failures_remaining -= 1;
                    let err = StreamError::new(device_id.clone(), script.cause.clone());
                    drop(scripts);
                    shared.record(PlatformEvent::OpenFailed {
                        device_id,
                        error_name: err.name().to_string(),
                    });
                    return Err(err);
                }
                (script.deliver_frames, script.ptz)
            };

            let info = StreamInfo {
                device_id: device_id.clone(),
                facing: device.facing,
                resolution: constraints.resolution,
                usb_id: (device.facing == Facing::External).then(|| "046d:085c".to_string()),
            };
            let state = Arc::new(StreamState {
                device_id: device_id.clone(),
                ended: AtomicBool::new(false),
                deliver_frames,
                ptz,
                info,
            });
            lock(&shared.live).push(Arc::clone(&state));
            shared.record(PlatformEvent::Opened { device_id });

            Ok(Box::new(SimulatedStream {
                state,
                shared: Arc::clone(shared),
            }) as Box<dyn PlatformStream>)
        }
        .boxed()
    }
}

impl DeviceEnumerator for SimulatedPlatform {
    fn list_devices(&self) -> BoxFuture<'_, Vec<CameraDevice>> {
        let devices = lock(&self.shared.devices).clone();
        async move { devices }.boxed()
    }

    fn on_change(&self, callback: DeviceChangeCallback) {
        lock(&self.shared.callbacks).push(callback);
    }
}

struct SimulatedStream {
    state: Arc<StreamState>,
    shared: Arc<Shared>,
}

impl PlatformStream for SimulatedStream {
    fn info(&self) -> StreamInfo {
        self.state.info.clone()
    }

    fn is_ended(&self) -> bool {
        self.state.ended.load(Ordering::SeqCst)
    }

    fn has_frame(&self) -> bool {
        self.state.deliver_frames && !self.is_ended()
    }

    fn supports_ptz(&self) -> BoxFuture<'_, bool> {
        let ptz = self.state.ptz;
        async move { ptz }.boxed()
    }

    fn stop(&self) -> BoxFuture<'_, ()> {
        async move {
            lock(&self.shared.live).retain(|s| !Arc::ptr_eq(s, &self.state));
            self.shared.record(PlatformEvent::Closed {
                device_id: self.state.device_id.clone(),
            });
        }
        .boxed()
    }
}

impl std::fmt::Debug for SimulatedPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedPlatform")
            .field("devices", &lock(&self.shared.devices).len())
            .field("live_streams", &self.live_streams())
            .finish()
    }
}
