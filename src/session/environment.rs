// SPDX-License-Identifier: GPL-3.0-only

//! Environment signal sources
//!
//! Platform notifications (idle detector, visibility, window state, screen
//! monitors) are push sources. Each one is registered with a [`SignalSink`]
//! and translates its notifications into [`EnvironmentEvent`]s.

use super::suspend::Signal;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Notification from the platform environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentEvent {
    /// Idle detector changed state
    Idle { screen_locked: bool },
    /// Window visibility changed
    Visibility { hidden: bool },
    /// Window was minimized or restored
    WindowState { minimized: bool },
    /// External screen plugged or unplugged
    ExternalScreen { connected: bool },
    /// Screen turned off or on automatically
    ScreenPower { off_auto: bool },
    /// Tablet mode toggled
    TabletMode { enabled: bool },
    /// Caller asked to release or reacquire the camera
    SuspendRequest { requested: bool },
}

impl EnvironmentEvent {
    /// Suspend signal this event updates
    pub fn signal(&self) -> (Signal, bool) {
        match *self {
            EnvironmentEvent::Idle { screen_locked } => (Signal::Locked, screen_locked),
            EnvironmentEvent::Visibility { hidden } => (Signal::WindowHidden, hidden),
            EnvironmentEvent::WindowState { minimized } => (Signal::Minimized, minimized),
            EnvironmentEvent::ExternalScreen { connected } => (Signal::HasExternalScreen, connected),
            EnvironmentEvent::ScreenPower { off_auto } => (Signal::ScreenOffAuto, off_auto),
            EnvironmentEvent::TabletMode { enabled } => (Signal::TabletMode, enabled),
            EnvironmentEvent::SuspendRequest { requested } => (Signal::ExplicitSuspend, requested),
        }
    }
}

type ApplyFn = Arc<dyn Fn(Signal, bool) + Send + Sync>;

/// Entry point for signal updates, handed to every environment source
#[derive(Clone)]
pub struct SignalSink {
    apply: ApplyFn,
}

impl SignalSink {
    pub fn new(apply: impl Fn(Signal, bool) + Send + Sync + 'static) -> Self {
        Self {
            apply: Arc::new(apply),
        }
    }

    pub fn update(&self, signal: Signal, value: bool) {
        (self.apply)(signal, value);
    }

    pub fn handle(&self, event: EnvironmentEvent) {
        debug!(?event, "Environment event");
        let (signal, value) = event.signal();
        self.update(signal, value);
    }
}

impl std::fmt::Debug for SignalSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSink").finish_non_exhaustive()
    }
}

/// Listener-registration seam for one platform notification source
pub trait EnvironmentSource: Send + Sync {
    fn register(&self, sink: SignalSink);
}

/// Source fed from a channel, for shells that already have an event loop
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::UnboundedReceiver<EnvironmentEvent>>>,
}

impl ChannelSource {
    /// Create the source and the sender that feeds it
    pub fn new() -> (Self, mpsc::UnboundedSender<EnvironmentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl EnvironmentSource for ChannelSource {
    /// Forward events to `sink`; only the first registration takes effect
    fn register(&self, sink: SignalSink) {
        let Some(mut rx) = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            warn!("Channel source already registered");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime, environment events will be dropped");
            return;
        };
        runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                sink.handle(event);
            }
            debug!("Environment channel closed");
        });
    }
}
