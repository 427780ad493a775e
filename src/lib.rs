// SPDX-License-Identifier: GPL-3.0-only

//! Camera session - lifecycle controller for a single camera stream
//!
//! This library owns the one open camera stream of a capture application and
//! decides which device, mode and resolution is active. Stream acquisition,
//! mode switching, suspension and recovery from hardware failure are
//! serialized so that at most one reconfiguration is ever in flight.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Platform abstraction (stream factory, device enumeration,
//!   capture-mode strategies) and a simulated platform
//! - [`session`]: Reconfiguration controller, suspend aggregation, observer
//!   fan-out and the watchdog
//! - [`config`]: User configuration handling
//! - [`report`]: Hardware error report log
//!
//! # Example
//!
//! ```ignore
//! let platform = Arc::new(SimulatedPlatform::new(devices));
//! let controller = CameraController::builder(platform.clone(), platform)
//!     .strategies(strategies)
//!     .build()?;
//! controller.reconfigure().await;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod errors;
pub mod report;
pub mod session;

// Re-export commonly used types
pub use backends::camera::{CameraConfig, CameraDevice, CaptureMode, Facing};
pub use config::Config;
pub use errors::{SessionError, SessionResult};
pub use session::{CameraController, CameraObserver, ControllerBuilder, Signal};
