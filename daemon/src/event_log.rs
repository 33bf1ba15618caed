/// Append-only, human-readable record of what the daemon did.
///
/// One line per record:
///   `[2024-05-01 13:37:00] TRIGGER(Push OK) - activated content`
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Launched,
    Trigger(String),
    Notify,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Launched => f.write_str("LAUNCHED"),
            EventKind::Trigger(name) => write!(f, "TRIGGER({name})"),
            EventKind::Notify => f.write_str("NOTIFY"),
            EventKind::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub timestamp: DateTime<Local>,
    pub kind: EventKind,
    pub detail: String,
}

impl EventRecord {
    pub fn now(kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            kind,
            detail: detail.into(),
        }
    }

    /// Renders the record as a single line (without the trailing newline).
    /// Newlines inside `detail` are flattened so one record stays one line.
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {} - {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.kind,
            self.detail.replace(['\r', '\n'], " ")
        )
    }
}

#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record`. Failures are logged, never returned: a lost record
    /// must not interrupt monitoring.
    pub fn append(&self, record: &EventRecord) {
        if let Err(e) = self.try_append(record) {
            warn!(path = %self.path.display(), "failed to write event log: {e}");
        }
    }

    pub fn record(&self, kind: EventKind, detail: impl Into<String>) {
        self.append(&EventRecord::now(kind, detail));
    }

    fn try_append(&self, record: &EventRecord) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", record.to_line())
    }
}
