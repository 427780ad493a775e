// SPDX-License-Identifier: GPL-3.0-only

//! Camera session controller
//!
//! [`CameraController`] owns the single [`StreamHandle`] and serializes every
//! request to (re)open it. The state machine is:
//!
//! ```text
//!            reconfigure()
//!   Idle ─────────────────► InProgress ──success──► Idle
//!                               │
//!                            failure
//!                               ▼
//!                        AwaitingWatchdog ──tick──► InProgress
//! ```
//!
//! At most one attempt runs at a time. The check-and-set of the phase happens
//! under a mutex that is never held across an await; concurrent callers join
//! the in-flight attempt through a shared future.
//!
//! Availability ordering: the camera is marked unavailable before the old
//! stream is closed and available only after the new stream is open and
//! every `on_update_config` observer future has completed.

use super::environment::{EnvironmentSource, SignalSink};
use super::observers::{CameraObserver, ObserverId, ObserverRegistry};
use super::selector::{DevicePreference, ModeSelector, Selection};
use super::suspend::{Signal, SuspendAggregator, SuspendSignals};
use super::surface::{
    ErrorKind, ErrorReporter, ErrorSeverity, HardwareFailure, LogReporter, LogWarningSurface,
    WarningSurface,
};
use super::watchdog::{AttemptFn, Watchdog, WatchdogState};
use crate::backends::camera::{
    CameraConfig, CameraDevice, CameraPlatform, CandidateStream, CaptureMode, CaptureModeStrategy,
    DeviceEnumerator, Facing, FrameWait, StreamHandle, StreamInfo, StreamLost,
};
use crate::config::Config;
use crate::errors::{AcquisitionCause, SessionError, SessionResult, StreamError, SuspendedDuringAttempt};
use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, Stream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observable reconfiguration state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigurationState {
    Idle,
    InProgress,
    AwaitingWatchdog,
}

type Attempt = Shared<BoxFuture<'static, bool>>;

enum Phase {
    Idle,
    InProgress(Attempt),
    AwaitingWatchdog,
}

enum Claim {
    Started(Attempt),
    Joined(Attempt),
}

enum Failure {
    Hardware,
    Suspended,
    ShutDown,
}

enum Acquired {
    /// Open stream and the preference revision it was selected for
    Stream(Selection, u64),
    Failed(Failure),
}

/// The realized configuration and its stream
#[derive(Debug, Clone)]
pub struct ActiveCamera {
    pub config: Arc<CameraConfig>,
    pub info: StreamInfo,
    pub candidate: CandidateStream,
    pub ptz: bool,
    pub generation: u64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Device following `current` in enumeration order, wrapping around
///
/// Falls back to the first device when `current` is unknown.
pub fn next_device<'a>(devices: &'a [CameraDevice], current: Option<&str>) -> Option<&'a CameraDevice> {
    if devices.is_empty() {
        return None;
    }
    let next = current
        .and_then(|id| devices.iter().position(|d| d.device_id == id))
        .map(|index| (index + 1) % devices.len())
        .unwrap_or(0);
    devices.get(next)
}

struct Inner {
    stream: Arc<StreamHandle>,
    enumerator: Arc<dyn DeviceEnumerator>,
    selector: ModeSelector,
    suspend: Arc<SuspendAggregator>,
    observers: Arc<ObserverRegistry>,
    warning: Arc<dyn WarningSurface>,
    reporter: Arc<dyn ErrorReporter>,
    watchdog: Watchdog,
    runtime: Handle,
    phase: Mutex<Phase>,
    preference: Mutex<DevicePreference>,
    /// Bumped by every caller intent
    revision: AtomicU64,
    /// Revision of the preference behind the open stream
    applied_revision: AtomicU64,
    active: Mutex<Option<ActiveCamera>>,
    available: watch::Sender<bool>,
    warning_shown: AtomicBool,
    schedule_pending: AtomicBool,
    /// Bumped by every scheduled reconfiguration request
    schedule_requests: AtomicU64,
    shut_down: AtomicBool,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn state(&self) -> ReconfigurationState {
        match &*lock(&self.phase) {
            Phase::Idle => ReconfigurationState::Idle,
            Phase::InProgress(_) => ReconfigurationState::InProgress,
            Phase::AwaitingWatchdog => ReconfigurationState::AwaitingWatchdog,
        }
    }

    /// Join the in-flight attempt or start a new one
    fn claim(self: &Arc<Self>) -> Claim {
        let mut phase = lock(&self.phase);
        if let Phase::InProgress(attempt) = &*phase {
            // A finished future still parked here means its task died
            if attempt.peek().is_none() {
                return Claim::Joined(attempt.clone());
            }
        }

        let attempt = self.spawn_attempt();
        *phase = Phase::InProgress(attempt.clone());
        Claim::Started(attempt)
    }

    fn spawn_attempt(self: &Arc<Self>) -> Attempt {
        let inner = Arc::clone(self);
        let task = self.runtime.spawn(async move { inner.run_attempt().await });
        async move { task.await.unwrap_or(false) }.boxed().shared()
    }

    async fn reconfigure(self: &Arc<Self>) -> bool {
        self.reconfigure_requested(None).await
    }

    /// `scheduled` carries the schedule request count seen by a scheduled
    /// task. Such a task keeps `schedule_pending` set until it claims an
    /// attempt, so requests arriving while it waits collapse into it.
    async fn reconfigure_requested(self: &Arc<Self>, scheduled: Option<u64>) -> bool {
        if self.is_shut_down() {
            return false;
        }

        if self.watchdog.is_active() {
            let ok = self.watchdog.wait_next_reconfigure().await;
            debug!(ok, "Watchdog attempt settled");
            let coalesced = match scheduled {
                Some(seen) => self.release_schedule() != seen,
                None => false,
            };
            // The watchdog may have used an older preference than the caller's
            if ok
                && !coalesced
                && self.applied_revision.load(Ordering::SeqCst)
                    == self.revision.load(Ordering::SeqCst)
            {
                return true;
            }
        }
        if scheduled.is_some() {
            self.release_schedule();
        }

        let mut joined = false;
        loop {
            match self.claim() {
                Claim::Started(attempt) => return attempt.await,
                Claim::Joined(attempt) => {
                    let ok = attempt.await;
                    // A second join means the attempt started after this
                    // request and already reflects it
                    if !ok || joined {
                        return ok;
                    }
                    joined = true;
                }
            }
        }
    }

    /// Watchdog retries never reuse a finished result, only a running attempt
    async fn reconfigure_internal(self: &Arc<Self>) -> bool {
        if self.is_shut_down() {
            return false;
        }
        match self.claim() {
            Claim::Started(attempt) | Claim::Joined(attempt) => attempt.await,
        }
    }

    async fn run_attempt(self: Arc<Self>) -> bool {
        match self.acquire().await {
            Acquired::Stream(selection, revision) => self.commit(selection, revision).await,
            Acquired::Failed(failure) => {
                self.fail(failure);
                false
            }
        }
    }

    async fn acquire(self: &Arc<Self>) -> Acquired {
        self.set_available(false);
        *lock(&self.active) = None;
        let suspended = self.suspend.should_suspend();
        self.stream.close().await;

        if self.is_shut_down() {
            return Acquired::Failed(Failure::ShutDown);
        }
        if suspended {
            debug!("Suspended, not opening a stream");
            return Acquired::Failed(Failure::Suspended);
        }

        let devices = self.enumerator.list_devices().await;
        let (preference, revision) = {
            let preference = lock(&self.preference);
            (preference.clone(), self.revision.load(Ordering::SeqCst))
        };
        debug!(
            devices = devices.len(),
            device_id = ?preference.device_id,
            facing = ?preference.facing,
            mode = %preference.mode,
            "Reconfiguring camera"
        );

        match self.selector.select(&devices, &preference).await {
            Ok(Some(selection)) => Acquired::Stream(selection, revision),
            Ok(None) => Acquired::Failed(Failure::Hardware),
            Err(SuspendedDuringAttempt) => Acquired::Failed(Failure::Suspended),
        }
    }

    async fn commit(self: &Arc<Self>, selection: Selection, revision: u64) -> bool {
        let config = Arc::new(selection.config);
        self.applied_revision.store(revision, Ordering::SeqCst);
        lock(&self.preference).device_id = Some(config.device_id.clone());
        *lock(&self.active) = Some(ActiveCamera {
            config: Arc::clone(&config),
            info: selection.info.clone(),
            candidate: selection.candidate.clone(),
            ptz: selection.ptz,
            generation: selection.generation,
        });

        self.observers.update_config(&config).await;

        if self.is_shut_down() || self.suspend.should_suspend() {
            info!(device_id = %config.device_id, "Suspended before the camera became available, discarding stream");
            *lock(&self.active) = None;
            self.stream.close().await;
            self.fail(if self.is_shut_down() {
                Failure::ShutDown
            } else {
                Failure::Suspended
            });
            return false;
        }

        self.set_available(true);
        if self.warning_shown.swap(false, Ordering::SeqCst) {
            self.warning.dismiss_no_camera_warning();
        }

        *lock(&self.phase) = Phase::Idle;
        // Outcome first, so waiters woken by the cancel see success
        self.watchdog.record_outcome(true);
        self.watchdog.cancel();

        info!(
            device_id = %config.device_id,
            facing = %config.facing,
            mode = %config.mode,
            resolution = %selection.candidate.capture_resolution,
            ptz = selection.ptz,
            "Camera configured"
        );
        true
    }

    fn fail(self: &Arc<Self>, failure: Failure) {
        match failure {
            Failure::ShutDown => {
                *lock(&self.phase) = Phase::Idle;
                self.watchdog.record_outcome(false);
                return;
            }
            Failure::Hardware => {
                if !self.warning_shown.swap(true, Ordering::SeqCst) {
                    warn!("No camera could be opened");
                    self.warning.show_no_camera_warning();
                }
            }
            Failure::Suspended => debug!("Reconfiguration deferred while suspended"),
        }

        *lock(&self.phase) = Phase::AwaitingWatchdog;
        if !self.is_shut_down() {
            self.watchdog.start(self.watchdog_attempt());
        }
        self.watchdog.record_outcome(false);
    }

    fn watchdog_attempt(self: &Arc<Self>) -> AttemptFn {
        let weak = Arc::downgrade(self);
        Arc::new(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(inner) => inner.reconfigure_internal().await,
                    None => false,
                }
            }
            .boxed()
        })
    }

    /// Edge-triggered availability update
    fn set_available(&self, value: bool) {
        let changed = self.available.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if !changed {
            return;
        }

        if value {
            info!("Camera available");
            self.observers.camera_available();
        } else {
            info!("Camera unavailable");
            self.observers.camera_unavailable();
        }
    }

    /// Request a reconfiguration on the next scheduler turn
    ///
    /// Requests collapse into one until the scheduled task claims an
    /// attempt, including while it waits on the watchdog.
    fn schedule_reconfigure(self: &Arc<Self>) {
        if self.is_shut_down() {
            return;
        }
        self.schedule_requests.fetch_add(1, Ordering::SeqCst);
        if self.schedule_pending.swap(true, Ordering::SeqCst) {
            debug!("Reconfiguration already scheduled");
            return;
        }
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::task::yield_now().await;
            let seen = inner.schedule_requests.load(Ordering::SeqCst);
            let ok = inner.reconfigure_requested(Some(seen)).await;
            debug!(ok, "Scheduled reconfiguration finished");
        });
    }

    /// Let the next request schedule a new task; returns the request count
    fn release_schedule(&self) -> u64 {
        self.schedule_pending.store(false, Ordering::SeqCst);
        self.schedule_requests.load(Ordering::SeqCst)
    }

    /// Record a caller intent
    fn update_preference(&self, update: impl FnOnce(&mut DevicePreference)) {
        let mut preference = lock(&self.preference);
        update(&mut preference);
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn update_signal(self: &Arc<Self>, signal: Signal, value: bool) {
        if self.suspend.update_signal(signal, value) {
            self.schedule_reconfigure();
        }
    }

    fn handle_stream_lost(self: &Arc<Self>, lost: StreamLost) {
        if lost.generation != self.stream.generation() {
            debug!(generation = lost.generation, "Ignoring loss of a replaced stream");
            return;
        }
        if self.is_shut_down() {
            return;
        }

        if self.suspend.should_suspend() {
            // The stream is torn down on suspend anyway
            debug!(device_id = %lost.device_id, "Camera stream lost while suspended");
            self.schedule_reconfigure();
            return;
        }

        warn!(device_id = %lost.device_id, generation = lost.generation, "Camera stream lost");
        let (facing, mode) = lock(&self.active)
            .as_ref()
            .map(|active| (active.config.facing, Some(active.config.mode)))
            .unwrap_or((Facing::Unknown, None));
        self.reporter.report(
            ErrorKind::StreamEnded,
            ErrorSeverity::Warning,
            &HardwareFailure {
                facing,
                mode,
                error: StreamError::new(
                    lost.device_id,
                    AcquisitionCause::Other("TrackEndedError".to_string()),
                ),
            },
        );
        self.schedule_reconfigure();
    }

    fn spawn_listeners(self: &Arc<Self>, mut lost_rx: mpsc::UnboundedReceiver<StreamLost>) {
        let weak = Arc::downgrade(self);
        let lost_task = self.runtime.spawn(async move {
            while let Some(lost) = lost_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_stream_lost(lost);
            }
        });
        lock(&self.listeners).push(lost_task);

        let weak = Arc::downgrade(self);
        self.enumerator.on_change(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                info!("Camera device list changed");
                inner.schedule_reconfigure();
            }
        }));
    }
}

/// Camera session controller
///
/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct CameraController {
    inner: Arc<Inner>,
}

impl CameraController {
    pub fn builder(
        platform: Arc<dyn CameraPlatform>,
        enumerator: Arc<dyn DeviceEnumerator>,
    ) -> ControllerBuilder {
        ControllerBuilder::new(platform, enumerator)
    }

    /// Reconfigure the camera from the current preference
    ///
    /// Never fails; resolves to whether a stream is open afterwards. While
    /// an attempt is running this joins it, and only starts a fresh attempt
    /// if the joined one succeeded. While the watchdog is retrying this first
    /// waits for its next attempt.
    pub async fn reconfigure(&self) -> bool {
        self.inner.reconfigure().await
    }

    /// Switch to the next device in enumeration order, wrapping around
    pub async fn switch_camera(&self) -> bool {
        let devices = self.inner.enumerator.list_devices().await;
        let current = self
            .current_config()
            .map(|config| config.device_id.clone())
            .or_else(|| lock(&self.inner.preference).device_id.clone());

        if let Some(next) = next_device(&devices, current.as_deref()) {
            info!(from = ?current, to = %next.device_id, "Switching camera");
            self.inner.update_preference(|preference| {
                preference.device_id = Some(next.device_id.clone());
                preference.facing = None;
            });
        }
        self.reconfigure().await
    }

    /// Prefer a specific device
    pub async fn select_device(&self, device_id: &str) -> bool {
        self.inner.update_preference(|preference| {
            preference.device_id = Some(device_id.to_string());
            preference.facing = None;
        });
        self.reconfigure().await
    }

    /// Prefer devices with the given facing
    pub async fn set_facing(&self, facing: Facing) -> bool {
        self.inner.update_preference(|preference| {
            preference.facing = Some(facing);
            preference.device_id = None;
        });
        self.reconfigure().await
    }

    /// Try `mode` first on every device
    pub async fn set_mode(&self, mode: CaptureMode) -> bool {
        self.inner.update_preference(|preference| preference.mode = mode);
        self.reconfigure().await
    }

    /// Update one suspend signal, reconfiguring if the predicate changed
    pub fn update_signal(&self, signal: Signal, value: bool) {
        self.inner.update_signal(signal, value);
    }

    /// Sink that feeds environment events into this controller
    pub fn signal_sink(&self) -> SignalSink {
        let weak = Arc::downgrade(&self.inner);
        SignalSink::new(move |signal, value| {
            if let Some(inner) = weak.upgrade() {
                inner.update_signal(signal, value);
            }
        })
    }

    pub fn attach_source(&self, source: &dyn EnvironmentSource) {
        source.register(self.signal_sink());
    }

    pub fn should_suspend(&self) -> bool {
        self.inner.suspend.should_suspend()
    }

    pub fn suspend_signals(&self) -> SuspendSignals {
        self.inner.suspend.snapshot()
    }

    pub fn register_observer(&self, observer: Arc<dyn CameraObserver>) -> ObserverId {
        self.inner.observers.register(observer)
    }

    pub fn unregister_observer(&self, id: ObserverId) -> bool {
        self.inner.observers.unregister(id)
    }

    pub fn state(&self) -> ReconfigurationState {
        self.inner.state()
    }

    pub fn watchdog_state(&self) -> WatchdogState {
        self.inner.watchdog.state()
    }

    /// Outcome of the next reconfiguration attempt
    pub async fn wait_next_reconfigure(&self) -> bool {
        self.inner.watchdog.wait_next_reconfigure().await
    }

    pub fn is_available(&self) -> bool {
        *self.inner.available.borrow()
    }

    /// Receiver of camera availability
    pub fn availability(&self) -> watch::Receiver<bool> {
        self.inner.available.subscribe()
    }

    /// Current availability followed by every distinct transition
    pub fn availability_stream(&self) -> impl Stream<Item = bool> + Send + 'static {
        let mut rx = self.inner.available.subscribe();
        async_stream::stream! {
            let mut last = *rx.borrow_and_update();
            yield last;
            while rx.changed().await.is_ok() {
                let value = *rx.borrow_and_update();
                if value != last {
                    last = value;
                    yield value;
                }
            }
        }
    }

    /// Last realized configuration; `None` while reconfiguring or failed
    pub fn current_config(&self) -> Option<Arc<CameraConfig>> {
        lock(&self.inner.active)
            .as_ref()
            .map(|active| Arc::clone(&active.config))
    }

    pub fn active_camera(&self) -> Option<ActiveCamera> {
        lock(&self.inner.active).clone()
    }

    pub fn preference(&self) -> DevicePreference {
        lock(&self.inner.preference).clone()
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.inner.stream.current_info()
    }

    /// Wait for the first frame of the open stream
    pub async fn wait_frame_ready(&self) -> FrameWait {
        self.inner.stream.wait_frame_ready().await
    }

    /// Stop retrying, mark the camera unavailable and close the stream
    ///
    /// Waits for an in-flight attempt first. Later reconfiguration requests
    /// resolve to false. Idempotent.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down camera session");

        inner.watchdog.cancel();
        let in_flight = {
            let phase = lock(&inner.phase);
            match &*phase {
                Phase::InProgress(attempt) => Some(attempt.clone()),
                _ => None,
            }
        };
        if let Some(attempt) = in_flight {
            attempt.await;
        }
        inner.watchdog.cancel();

        inner.set_available(false);
        *lock(&inner.active) = None;
        inner.stream.close().await;

        for task in lock(&inner.listeners).drain(..) {
            task.abort();
        }
    }
}

impl std::fmt::Debug for CameraController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraController")
            .field("state", &self.state())
            .field("available", &self.is_available())
            .field("watchdog", &self.inner.watchdog)
            .finish()
    }
}

/// Builder for [`CameraController`]
pub struct ControllerBuilder {
    platform: Arc<dyn CameraPlatform>,
    enumerator: Arc<dyn DeviceEnumerator>,
    strategies: Vec<Arc<dyn CaptureModeStrategy>>,
    warning: Arc<dyn WarningSurface>,
    reporter: Arc<dyn ErrorReporter>,
    config: Config,
}

impl ControllerBuilder {
    pub fn new(platform: Arc<dyn CameraPlatform>, enumerator: Arc<dyn DeviceEnumerator>) -> Self {
        Self {
            platform,
            enumerator,
            strategies: Vec::new(),
            warning: Arc::new(LogWarningSurface),
            reporter: Arc::new(LogReporter),
            config: Config::default(),
        }
    }

    /// Add the strategy for one capture mode
    pub fn strategy(mut self, strategy: Arc<dyn CaptureModeStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn strategies<I>(mut self, strategies: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn CaptureModeStrategy>>,
    {
        self.strategies.extend(strategies);
        self
    }

    pub fn warning_surface(mut self, warning: Arc<dyn WarningSurface>) -> Self {
        self.warning = warning;
        self
    }

    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Build the controller
    ///
    /// Must be called from within a tokio runtime; background tasks are
    /// spawned on it.
    pub fn build(self) -> SessionResult<CameraController> {
        let runtime = Handle::try_current().map_err(|e| SessionError::Runtime(e.to_string()))?;
        if self.strategies.is_empty() {
            return Err(SessionError::Config(
                "at least one capture mode strategy is required".to_string(),
            ));
        }

        let config = self.config;
        let (stream, lost_rx) = StreamHandle::new(self.platform, config.stream_poll_interval());
        let stream = Arc::new(stream);
        let suspend = Arc::new(SuspendAggregator::new());
        let observers = Arc::new(ObserverRegistry::new());
        let selector = ModeSelector::new(
            self.strategies,
            config.mode_priority.clone(),
            Arc::clone(&stream),
            Arc::clone(&suspend),
            Arc::clone(&observers),
            Arc::clone(&self.reporter),
        );
        let (available, _) = watch::channel(false);

        let inner = Arc::new(Inner {
            stream,
            enumerator: self.enumerator,
            selector,
            suspend,
            observers,
            warning: self.warning,
            reporter: self.reporter,
            watchdog: Watchdog::new(config.watchdog_interval(), runtime.clone()),
            runtime,
            phase: Mutex::new(Phase::Idle),
            preference: Mutex::new(DevicePreference {
                device_id: config.last_device_id.clone(),
                facing: config.preferred_facing,
                mode: config.preferred_mode,
            }),
            revision: AtomicU64::new(0),
            applied_revision: AtomicU64::new(0),
            active: Mutex::new(None),
            available,
            warning_shown: AtomicBool::new(false),
            schedule_pending: AtomicBool::new(false),
            schedule_requests: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        });
        inner.spawn_listeners(lost_rx);

        debug!(?config, "Camera controller created");
        Ok(CameraController { inner })
    }
}
