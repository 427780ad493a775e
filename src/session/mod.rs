// SPDX-License-Identifier: GPL-3.0-only

//! Camera session lifecycle
//!
//! Everything that decides when the camera stream is opened, closed or
//! switched lives here. [`controller::CameraController`] is the entry point;
//! the other modules are its collaborators.

pub mod controller;
pub mod environment;
pub mod observers;
pub mod selector;
pub mod surface;
pub mod suspend;
pub mod watchdog;

pub use controller::{ActiveCamera, CameraController, ControllerBuilder, ReconfigurationState};
pub use environment::{ChannelSource, EnvironmentEvent, EnvironmentSource, SignalSink};
pub use observers::{CameraObserver, ObserverFuture, ObserverId, ObserverRegistry};
pub use selector::{DevicePreference, ModeSelector, Selection};
pub use surface::{
    ErrorKind, ErrorReporter, ErrorSeverity, HardwareFailure, LogReporter, LogWarningSurface,
    WarningSurface,
};
pub use suspend::{Signal, SuspendAggregator, SuspendSignals};
pub use watchdog::{Watchdog, WatchdogState};
