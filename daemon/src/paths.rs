/// Canonical file paths for LogChime data files.
///
/// All files live under %APPDATA%\LogChime\:
///   - config.toml  Edited by the user/settings UI, read by the daemon.
///   - status.toml  Written by the daemon, read by the tray UI.
///   - events.txt   Append-only event record written by the daemon.
///
/// Off Windows, `$XDG_CONFIG_HOME` (or `~/.config`) stands in for %APPDATA%.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "LogChime";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";
pub const EVENT_LOG_FILE_NAME: &str = "events.txt";
const ASSETS_DIR_NAME: &str = "assets";

/// Returns the LogChime application data directory: %APPDATA%\LogChime\
pub fn app_data_dir() -> PathBuf {
    base_data_dir().join(APP_DIR_NAME)
}

fn base_data_dir() -> PathBuf {
    if let Some(appdata) = std::env::var_os("APPDATA") {
        return PathBuf::from(appdata);
    }
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config"),
        None => PathBuf::from("."),
    }
}

/// Returns the full path to the config file: %APPDATA%\LogChime\config.toml
pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

/// Returns the full path to the status file: %APPDATA%\LogChime\status.toml
pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}

/// Returns the full path to the event log: %APPDATA%\LogChime\events.txt
pub fn event_log_file_path() -> PathBuf {
    app_data_dir().join(EVENT_LOG_FILE_NAME)
}

/// Directory holding bundled resources (sounds), next to the executable.
pub fn assets_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(ASSETS_DIR_NAME)
}

/// Expands common `%VAR%`-style environment variables embedded in Windows paths.
pub fn expand_env(s: &str) -> String {
    let mut result = s.to_string();
    for var in &["USERPROFILE", "USERNAME", "APPDATA", "LOCALAPPDATA", "TEMP", "TMP"] {
        if let Ok(val) = std::env::var(var) {
            result = result.replace(&format!("%{var}%"), &val);
        }
    }
    result
}
