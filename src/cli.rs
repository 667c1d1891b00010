// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Command-line arguments for `fleetexec`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fleetexec",
    version,
    about = "Apply a job across a fleet of hosts and follow its progress live.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Fleetexec.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "Fleetexec.toml")]
    pub config: String,

    /// Apply the job to this host only.
    ///
    /// The host must be part of `[job].hosts`.
    #[arg(long, value_name = "HOST")]
    pub host: Option<String>,

    /// Print line-oriented progress instead of the full-screen dashboard.
    #[arg(long)]
    pub non_interactive: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLEETEXEC_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Write logs to this file.
    ///
    /// The dashboard defaults to `fleetexec.log` so logs do not tear the
    /// screen; non-interactive runs log to stderr unless this is set.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Parse + validate, print the plan, but don't dispatch anything.
    #[arg(long)]
    pub dry_run: bool,
}

impl CliArgs {
    /// Log file actually used for this invocation.
    pub fn effective_log_file(&self) -> Option<PathBuf> {
        match (&self.log_file, self.non_interactive) {
            (Some(path), _) => Some(path.clone()),
            (None, false) => Some(PathBuf::from("fleetexec.log")),
            (None, true) => None,
        }
    }
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
