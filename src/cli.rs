// src/cli.rs

//! CLI argument parsing using `clap`.

use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::parse_duration;

/// Command-line arguments for `genqueue`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "genqueue",
    version,
    about = "Run a batch of generation tasks across a pool of sessions.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "genqueue.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `GENQUEUE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Validate the config and print the batch without executing anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Print the final status snapshot as JSON on stdout.
    #[arg(long)]
    pub json: bool,

    /// How often to log a progress summary while tasks run.
    #[arg(long, value_name = "DURATION", default_value = "5s", value_parser = parse_duration)]
    pub status_interval: Duration,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
