//! Error kinds surfaced by the monitoring core.
//!
//! None of these are fatal: the monitor loop maps each one to a status
//! transition and keeps polling.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MonitorError {
    /// The configuration file exists but could not be read or parsed.
    #[error("failed to load config {}: {reason}", path.display())]
    ConfigLoad { path: PathBuf, reason: String },

    /// No log path is configured and none was found on disk.
    #[error("no log file available")]
    LogUnavailable,

    /// Opening, identifying, or reading the monitored log failed.
    #[error("failed to read {}: {source}", path.display())]
    LogRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sound playback failed: {0}")]
    SoundPlayback(String),

    #[error("notification failed: {0}")]
    Notification(String),
}

impl MonitorError {
    pub fn log_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MonitorError::LogRead {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;
