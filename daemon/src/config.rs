use anyhow::Context;
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{MonitorError, Result};
use crate::event::DaemonEvent;

/// Resolved at runtime by expanding %LOCALAPPDATA%.
pub const DEFAULT_LOG_DIR: &str = r"%LOCALAPPDATA%\UnrealEditorFortnite\Saved\Logs";
pub const DEFAULT_LOG_PATTERN: &str = "UnrealEditorFortnite*.log";
pub const DEFAULT_SHOW_NOTIFICATIONS: bool = true;

/// Root configuration structure. Deserialized from %APPDATA%\LogChime\config.toml.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    /// Ordered trigger list; earlier entries win when several match one line.
    #[serde(default = "default_triggers")]
    pub triggers: Vec<TriggerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            triggers: default_triggers(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Log file to monitor. Empty means "discover automatically".
    #[serde(default)]
    pub log_file: String,
    /// Master switch for desktop notifications.
    #[serde(default = "default_show_notifications")]
    pub show_notifications: bool,
    /// Directory scanned for candidate log files. `%VAR%` references are expanded.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// File-name glob a candidate log must match.
    #[serde(default = "default_log_pattern")]
    pub log_pattern: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_file: String::new(),
            show_notifications: DEFAULT_SHOW_NOTIFICATIONS,
            log_dir: DEFAULT_LOG_DIR.to_string(),
            log_pattern: DEFAULT_LOG_PATTERN.to_string(),
        }
    }
}

impl GlobalConfig {
    /// Returns the configured log path, or `None` when left blank.
    pub fn configured_log_file(&self) -> Option<PathBuf> {
        let trimmed = self.log_file.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }
}

/// A single trigger rule as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Display label; also the notification title.
    pub name: String,
    /// Phrases searched for (case-insensitively) in each new log line.
    pub keywords: Vec<String>,
    /// Sound file: absolute path, or a name inside the bundled `assets` directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
    #[serde(default = "default_notify")]
    pub notify: bool,
}

impl TriggerConfig {
    pub fn new(name: &str, keywords: &[&str], sound: Option<&str>, notify: bool) -> Self {
        Self {
            name: name.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            sound: sound.map(str::to_string),
            notify,
        }
    }
}

/// Trigger set used when the config file has no `[[triggers]]` entries at all.
pub fn default_triggers() -> Vec<TriggerConfig> {
    vec![
        TriggerConfig::new(
            "Session Connected",
            &["EMemorySamplerState::Ready"],
            Some("default_success.wav"),
            true,
        ),
        TriggerConfig::new(
            "Push Failure",
            &["LogValkyrieRequestManagerEditor: Error"],
            None,
            true,
        ),
        TriggerConfig::new(
            "HLOD Generated",
            &["LogEditorBuildUtils: Build time"],
            Some("default_success.wav"),
            true,
        ),
        TriggerConfig::new(
            "HLOD Failure",
            &["LogWorldPartitionEditor: Error"],
            None,
            true,
        ),
    ]
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns [`MonitorError::ConfigLoad`] if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path).map_err(|e| MonitorError::ConfigLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    toml::from_str(&content).map_err(|e| MonitorError::ConfigLoad {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Serializes `config` to TOML and writes it to `path`, creating the parent
/// directory if needed.
pub fn save(path: &Path, config: &Config) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            error!("failed to create config watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            error!("config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        error!("failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_config = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_config && is_write {
            match load_or_default(&path) {
                Ok(config) => {
                    debug!(triggers = config.triggers.len(), "config file changed");
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                // Keep the previous snapshot; a half-saved file will be retried
                // on the next write event.
                Err(e) => warn!("{e}"),
            }
        }
    }
}

fn default_show_notifications() -> bool {
    DEFAULT_SHOW_NOTIFICATIONS
}

fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.to_string()
}

fn default_log_pattern() -> String {
    DEFAULT_LOG_PATTERN.to_string()
}

fn default_notify() -> bool {
    true
}
