use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// What the monitor is doing right now.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusState {
    Initializing,
    WaitingForLog,
    Monitoring(PathBuf),
    Error(String),
    Triggered { name: String, since: DateTime<Local> },
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusState::Initializing => f.write_str("Initializing..."),
            StatusState::WaitingForLog => f.write_str("Waiting for log..."),
            StatusState::Monitoring(path) => {
                let name = path.file_name().unwrap_or(path.as_os_str());
                write!(f, "Monitoring: {}", name.to_string_lossy())
            }
            StatusState::Error(message) => write!(f, "Error: {message}"),
            StatusState::Triggered { name, .. } => write!(f, "Triggered: {name}"),
        }
    }
}

/// Everything the tray UI shows about the monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub state: StatusState,
    /// Log file being monitored; kept while a trigger is shown.
    pub log_file: Option<PathBuf>,
    pub last_trigger: Option<DateTime<Local>>,
}

impl Default for Status {
    fn default() -> Self {
        Self {
            state: StatusState::Initializing,
            log_file: None,
            last_trigger: None,
        }
    }
}

/// Single write point for [`Status`].
///
/// Clones share one `watch` channel: the monitor loop and the debounce timer
/// write through it, readers only ever see complete values.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<Status>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Status::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Status {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    /// Sets the state; readers are only woken if it actually changed.
    pub fn set(&self, state: StatusState) {
        self.tx.send_if_modified(|status| {
            if status.state == state {
                return false;
            }
            match &state {
                StatusState::Monitoring(path) => status.log_file = Some(path.clone()),
                StatusState::WaitingForLog => status.log_file = None,
                _ => {}
            }
            status.state = state;
            true
        });
    }

    /// Records a trigger firing at `since`.
    pub fn set_triggered(&self, name: &str, since: DateTime<Local>) {
        self.tx.send_modify(|status| {
            status.state = StatusState::Triggered {
                name: name.to_string(),
                since,
            };
            status.last_trigger = Some(since);
        });
    }

    /// Moves back to `Monitoring(path)` only if the status still shows the
    /// trigger `name` that fired at `since`. Returns whether it did.
    pub fn reset_trigger(&self, name: &str, since: DateTime<Local>, path: &Path) -> bool {
        self.tx.send_if_modified(|status| {
            let current = matches!(
                &status.state,
                StatusState::Triggered { name: n, since: s } if n == name && *s == since
            );
            if current {
                status.state = StatusState::Monitoring(path.to_path_buf());
                status.log_file = Some(path.to_path_buf());
            }
            current
        })
    }
}

// ── Status file ───────────────────────────────────────────────────────────────

/// Coarse state written to the status file.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Initializing,
    WaitingForLog,
    Monitoring,
    Error,
    Triggered,
}

/// Runtime status written by the daemon to %APPDATA%\LogChime\status.toml.
/// The tray UI reads this file (read-only) to display daemon state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DaemonState,
    /// Human-readable one-line status, e.g. "Monitoring: editor.log".
    pub label: String,
    /// Log file being monitored, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    /// Name of the trigger currently shown, while in the `triggered` state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    /// RFC 3339 timestamp of the most recent trigger, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trigger_timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    pub fn from_status(status: &Status) -> Self {
        let mut report = Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Initializing,
            label: status.state.to_string(),
            log_file: status
                .log_file
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            trigger: None,
            last_trigger_timestamp: status.last_trigger.map(|t| t.to_rfc3339()),
            error: None,
        };
        match &status.state {
            StatusState::Initializing => {}
            StatusState::WaitingForLog => report.state = DaemonState::WaitingForLog,
            StatusState::Monitoring(_) => report.state = DaemonState::Monitoring,
            StatusState::Error(message) => {
                report.state = DaemonState::Error;
                report.error = Some(message.clone());
            }
            StatusState::Triggered { name, .. } => {
                report.state = DaemonState::Triggered;
                report.trigger = Some(name.clone());
            }
        }
        report
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Logs errors rather than panicking; a status write failure should never
/// stop monitoring.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!("failed to write status file: {e}");
            }
        }
        Err(e) => warn!("failed to serialize status: {e}"),
    }
}

/// Rewrites the status file every time the published [`Status`] changes, until
/// every [`StatusHandle`] is dropped.
pub async fn publish_to_file(mut rx: watch::Receiver<Status>, path: PathBuf) {
    loop {
        let report = DaemonStatus::from_status(&rx.borrow_and_update());
        write_status(&path, &report);
        if rx.changed().await.is_err() {
            break;
        }
    }
}
