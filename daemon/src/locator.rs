/// Log file discovery.
///
/// When no log file is configured (or the configured one has disappeared), the
/// monitor asks the [`LogLocator`] for the most recently modified file in the
/// log directory whose name matches the configured glob.
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use globset::{GlobBuilder, GlobMatcher};
use tracing::warn;

use crate::config::{GlobalConfig, DEFAULT_LOG_PATTERN};
use crate::paths::expand_env;

#[derive(Debug, Clone)]
pub struct LogLocator {
    dir: PathBuf,
    matcher: GlobMatcher,
}

impl LogLocator {
    /// Builds a locator scanning `dir` for file names matching `pattern`.
    /// Matching is case-insensitive on Windows, where file names are.
    pub fn new(dir: impl Into<PathBuf>, pattern: &str) -> Result<Self, globset::Error> {
        let matcher = GlobBuilder::new(pattern)
            .case_insensitive(cfg!(windows))
            .build()?
            .compile_matcher();
        Ok(Self {
            dir: dir.into(),
            matcher,
        })
    }

    /// Builds a locator from `[global] log_dir` / `log_pattern`, falling back to
    /// the default pattern if the configured one is not a valid glob.
    pub fn from_config(global: &GlobalConfig) -> Self {
        let dir = PathBuf::from(expand_env(&global.log_dir));
        match Self::new(dir.clone(), &global.log_pattern) {
            Ok(locator) => locator,
            Err(e) => {
                warn!(pattern = %global.log_pattern, "invalid log pattern ({e}); using default");
                Self::new(dir, DEFAULT_LOG_PATTERN).expect("default log pattern is a valid glob")
            }
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the path to monitor.
    ///
    /// An existing `configured` path always wins so an active session is never
    /// switched to a different file. Otherwise the newest matching file in the
    /// log directory is returned, or `None` if there is none.
    pub fn locate(&self, configured: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = configured {
            if path.is_file() {
                return Some(path.to_path_buf());
            }
        }
        self.newest_match()
    }

    fn newest_match(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| self.matcher.is_match(entry.file_name()))
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some((entry.path(), modified))
            })
            // Ties on mtime are broken by name so the choice is deterministic.
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(path, _)| path)
    }
}
