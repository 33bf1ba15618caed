//! Command-line arguments.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "logchime",
    version,
    about = "Watch an editor log and play a sound when configured phrases appear.",
    long_about = None
)]
pub struct CliArgs {
    /// Launched by the login registration; suppresses the startup notification.
    #[arg(long)]
    pub startup: bool,

    /// Path to the config file (TOML).
    ///
    /// Default: `config.toml` in the per-user app data directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LOGCHIME_LOG` or `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Register to start at login, then exit.
    #[arg(long, conflicts_with = "unregister_startup")]
    pub register_startup: bool,

    /// Remove the login registration, then exit.
    #[arg(long)]
    pub unregister_startup: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

pub fn parse() -> CliArgs {
    CliArgs::parse()
}
