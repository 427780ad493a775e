// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the camera session
//!
//! This module provides command-line functionality for:
//! - Running the controller against simulated cameras
//! - Printing the effective configuration

use camera_session::Config;
use camera_session::backends::camera::candidates::FormatStrategy;
use camera_session::backends::camera::simulated::{PlatformEvent, SimulatedPlatform};
use camera_session::backends::camera::{CameraConfig, CaptureModeStrategy};
use camera_session::errors::{AcquisitionCause, ObserverError};
use camera_session::report::JsonLinesReporter;
use camera_session::session::{
    CameraController, CameraObserver, ChannelSource, EnvironmentEvent, ErrorReporter, LogReporter,
    ObserverFuture, WarningSurface,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options of the `simulate` command
pub struct SimulateOptions {
    pub devices: String,
    pub fail_first: u32,
    pub suspend_after_ms: Option<u64>,
    pub resume_after_ms: Option<u64>,
    pub switch: bool,
    pub duration_ms: u64,
    pub report_file: Option<PathBuf>,
}

/// Prints controller events with the time since the simulation started
struct Printer {
    started: Instant,
}

impl Printer {
    fn line(&self, message: &str) {
        println!("[{:>6} ms] {}", self.started.elapsed().as_millis(), message);
    }
}

impl CameraObserver for Printer {
    fn name(&self) -> &str {
        "cli-printer"
    }

    fn on_trying_new_config(&self, config: &CameraConfig) -> Option<ObserverFuture> {
        self.line(&format!("trying {}", config));
        None
    }

    fn on_update_config(&self, config: &CameraConfig) -> Option<ObserverFuture> {
        self.line(&format!("configured {}", config));
        None
    }

    fn on_camera_available(&self) -> Result<(), ObserverError> {
        self.line("camera available");
        Ok(())
    }

    fn on_camera_unavailable(&self) -> Result<(), ObserverError> {
        self.line("camera unavailable");
        Ok(())
    }
}

impl WarningSurface for Printer {
    fn show_no_camera_warning(&self) {
        self.line("WARNING: no camera available");
    }

    fn dismiss_no_camera_warning(&self) {
        self.line("warning dismissed");
    }
}

/// Run the controller against simulated devices
pub fn simulate(options: SimulateOptions, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run_simulation(options, config))
}

async fn run_simulation(
    options: SimulateOptions,
    config: Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let devices = SimulatedPlatform::parse_devices(&options.devices)?;
    let Some(first) = devices.first().cloned() else {
        return Err("No devices given".into());
    };

    println!("Simulated cameras:");
    for device in &devices {
        println!("  {} ({})", device.device_id, device.facing);
    }
    println!();

    let platform = Arc::new(SimulatedPlatform::new(devices));
    if options.fail_first > 0 {
        platform.fail_next_opens(&first.device_id, options.fail_first, AcquisitionCause::NotReadable);
    }

    let reporter: Arc<dyn ErrorReporter> = match &options.report_file {
        Some(path) => Arc::new(JsonLinesReporter::new(path)),
        None => Arc::new(LogReporter),
    };
    let printer = Arc::new(Printer {
        started: Instant::now(),
    });

    let controller = CameraController::builder(platform.clone(), platform.clone())
        .strategies(
            FormatStrategy::all_modes(FormatStrategy::common_formats())
                .into_iter()
                .map(|s| Arc::new(s) as Arc<dyn CaptureModeStrategy>),
        )
        .warning_surface(printer.clone())
        .error_reporter(reporter)
        .config(config)
        .build()?;
    controller.register_observer(printer.clone());

    let (source, events) = ChannelSource::new();
    controller.attach_source(&source);
    for (after, requested) in [
        (options.suspend_after_ms, true),
        (options.resume_after_ms, false),
    ] {
        if let Some(ms) = after {
            let events = events.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                let _ = events.send(EnvironmentEvent::SuspendRequest { requested });
            });
        }
    }

    let ok = controller.reconfigure().await;
    printer.line(&format!(
        "initial reconfiguration {}",
        if ok { "succeeded" } else { "failed, watchdog retrying" }
    ));

    if options.switch {
        if !ok {
            controller.wait_next_reconfigure().await;
        }
        let ok = controller.switch_camera().await;
        printer.line(&format!("switch {}", if ok { "succeeded" } else { "failed" }));
    }

    let deadline = Duration::from_millis(options.duration_ms);
    if let Some(remaining) = deadline.checked_sub(printer.started.elapsed()) {
        tokio::time::sleep(remaining).await;
    }

    controller.shutdown().await;
    printer.line("shut down");

    let failed_opens = platform
        .events()
        .iter()
        .filter(|e| matches!(e, PlatformEvent::OpenFailed { .. }))
        .count();
    println!();
    println!("Successful opens: {}", platform.open_count());
    println!("Failed opens:     {}", failed_opens);
    println!("Live streams:     {}", platform.live_streams());
    if let Some(path) = &options.report_file {
        let reports = JsonLinesReporter::read_all(path)?;
        println!("Error reports:    {} ({})", reports.len(), path.display());
    }

    Ok(())
}

/// Print the effective configuration as JSON
pub fn print_config(config: &Config, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(path) => println!("# {}", path.display()),
        None => println!("# no config directory, using defaults"),
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
