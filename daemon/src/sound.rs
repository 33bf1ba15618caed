/// Sound resolution and playback.
///
/// A trigger's sound reference resolves through three levels:
///   1. the configured file (absolute path, or a name inside `assets/`);
///   2. the bundled `assets/default_success.wav`;
///   3. the platform alert sound.
///
/// Playback is asynchronous: [`SoundPlayer::play`] returns as soon as the
/// sound has been handed to the OS.
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;

pub const DEFAULT_SOUND_FILE: &str = "default_success.wav";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundSource {
    File(PathBuf),
    SystemAlert,
}

#[derive(Debug, Clone)]
pub struct SoundResolver {
    assets_dir: PathBuf,
}

impl SoundResolver {
    pub fn new(assets_dir: impl Into<PathBuf>) -> Self {
        Self {
            assets_dir: assets_dir.into(),
        }
    }

    pub fn resolve(&self, reference: Option<&str>) -> SoundSource {
        if let Some(reference) = reference.map(str::trim).filter(|r| !r.is_empty()) {
            let path = Path::new(reference);
            let candidate = if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.assets_dir.join(path)
            };
            if candidate.is_file() {
                return SoundSource::File(candidate);
            }
            debug!(sound = reference, "configured sound not found; using default");
        }

        let bundled = self.assets_dir.join(DEFAULT_SOUND_FILE);
        if bundled.is_file() {
            SoundSource::File(bundled)
        } else {
            SoundSource::SystemAlert
        }
    }
}

pub trait SoundPlayer: Send + Sync {
    fn play(&self, source: &SoundSource) -> Result<()>;
}

/// Plays through the OS: `PlaySoundW` on Windows, nothing elsewhere.
#[derive(Debug, Default)]
pub struct SystemSoundPlayer;

impl SoundPlayer for SystemSoundPlayer {
    fn play(&self, source: &SoundSource) -> Result<()> {
        imp::play(source)
    }
}

#[cfg(windows)]
mod imp {
    use std::os::windows::ffi::OsStrExt;
    use std::path::Path;

    use windows::core::{w, PCWSTR};
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::Media::Audio::{
        PlaySoundW, SND_ALIAS, SND_ASYNC, SND_FILENAME, SND_NODEFAULT,
    };

    use super::SoundSource;
    use crate::error::{MonitorError, Result};

    fn play_file(path: &Path) -> bool {
        let wide: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();
        // SAFETY: `wide` is a null-terminated UTF-16 string; PlaySound copies
        // the name before returning in async mode.
        unsafe {
            PlaySoundW(
                PCWSTR::from_raw(wide.as_ptr()),
                HMODULE::default(),
                SND_FILENAME | SND_ASYNC | SND_NODEFAULT,
            )
        }
        .as_bool()
    }

    fn play_alert() -> bool {
        // SAFETY: static null-terminated alias name.
        unsafe { PlaySoundW(w!("SystemAsterisk"), HMODULE::default(), SND_ALIAS | SND_ASYNC) }
            .as_bool()
    }

    pub fn play(source: &SoundSource) -> Result<()> {
        let played = match source {
            SoundSource::File(path) => play_file(path) || play_alert(),
            SoundSource::SystemAlert => play_alert(),
        };
        if played {
            Ok(())
        } else {
            Err(MonitorError::SoundPlayback(format!("PlaySoundW rejected {source:?}")))
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use super::SoundSource;
    use crate::error::Result;

    pub fn play(source: &SoundSource) -> Result<()> {
        tracing::debug!(?source, "no audio backend on this platform; skipping sound");
        Ok(())
    }
}
