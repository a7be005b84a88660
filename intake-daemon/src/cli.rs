//! CLI argument definitions for intake-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use intake_core::config::IntakeConfig;

/// Intake log reception daemon.
///
/// Runs the admission, buffering and batch processing pipeline and manages
/// its lifecycle.
#[derive(Parser, Debug)]
#[command(name = "intake-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to intake.toml configuration file.
    #[arg(short, long, default_value = "/etc/intake/intake.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Applies the log flags on top of a loaded config.
    pub fn apply_overrides(&self, config: &mut IntakeConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
    }
}
