// SPDX-License-Identifier: GPL-3.0-only

use camera_session::Config;
use camera_session::report::JsonLinesReporter;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-session")]
#[command(about = "Camera session controller with simulated devices")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Configuration file (default: ~/.config/camera-session/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller against simulated cameras
    Simulate {
        /// Devices as id:facing pairs (facing: user, environment, external)
        #[arg(short, long, default_value = "front:user,back:environment")]
        devices: String,

        /// Make the first N opens of the first device fail
        #[arg(long, default_value = "0")]
        fail_first: u32,

        /// Request suspension after this many milliseconds
        #[arg(long)]
        suspend_after_ms: Option<u64>,

        /// Lift the suspension after this many milliseconds
        #[arg(long)]
        resume_after_ms: Option<u64>,

        /// Switch to the next camera after the first configuration
        #[arg(long)]
        switch: bool,

        /// Total simulation time in milliseconds
        #[arg(long, default_value = "1000")]
        duration_ms: u64,

        /// Append hardware error reports to a JSON-lines file
        /// (default: ~/.local/share/camera-session/errors.jsonl)
        #[arg(long, num_args = 0..=1, value_name = "PATH")]
        report_file: Option<Option<PathBuf>>,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=camera_session=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let (config, config_path) = match cli.config {
        Some(path) => (Config::load(&path)?, Some(path)),
        None => (Config::load_default()?, Config::default_path()),
    };

    match cli.command {
        Commands::Simulate {
            devices,
            fail_first,
            suspend_after_ms,
            resume_after_ms,
            switch,
            duration_ms,
            report_file,
        } => cli::simulate(
            cli::SimulateOptions {
                devices,
                fail_first,
                suspend_after_ms,
                resume_after_ms,
                switch,
                duration_ms,
                report_file: resolve_report_file(report_file),
            },
            config,
        ),
        Commands::Config => cli::print_config(&config, config_path.as_deref()),
    }
}

/// `--report-file` without a value selects the default error log
fn resolve_report_file(arg: Option<Option<PathBuf>>) -> Option<PathBuf> {
    match arg {
        Some(Some(path)) => Some(path),
        Some(None) => JsonLinesReporter::default_path(),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_file_arg(args: &[&str]) -> Option<Option<PathBuf>> {
        let mut argv = vec!["camera-session", "simulate"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Simulate { report_file, .. } => report_file,
            Commands::Config => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_report_file_flag_forms() {
        assert_eq!(resolve_report_file(report_file_arg(&[])), None);

        let explicit = report_file_arg(&["--report-file", "/tmp/reports.jsonl"]);
        assert_eq!(
            resolve_report_file(explicit),
            Some(PathBuf::from("/tmp/reports.jsonl"))
        );

        let bare = report_file_arg(&["--report-file"]);
        assert_eq!(bare, Some(None));
        assert_eq!(resolve_report_file(bare), JsonLinesReporter::default_path());
    }
}
