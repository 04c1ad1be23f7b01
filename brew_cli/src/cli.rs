//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "coldbrew", version, about = "Cold-brew flow controller")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log and report as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one brew on the simulated brewer (or a recorded trace) until it completes
    Brew {
        /// Replay a recorded `seconds,weight` CSV instead of simulating the flow
        #[arg(long, value_name = "FILE")]
        trace: Option<PathBuf>,
        /// Run on simulated time as fast as possible instead of wall-clock time
        #[arg(long, action = ArgAction::SetTrue)]
        fast: bool,
        /// Seconds (of brew time) between status lines
        #[arg(long, value_name = "SECS", default_value_t = 300)]
        status_every_s: u64,
        /// Give up after this many hours of brew time
        #[arg(long, value_name = "HOURS", default_value_t = 24.0)]
        max_hours: f64,
    },
    /// Exercise the engine against the simulator: start, sample, nudge, kill
    SelfCheck,
    /// List the control strategies and their default parameters
    Strategies,
}
