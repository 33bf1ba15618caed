/// Stable identity of a physical file, independent of its path.
///
/// Used by the tailer to notice when the file at the monitored path has been
/// replaced (rotated) by a different file.
///
///   - Unix:    device + inode.
///   - Windows: volume serial number + 64-bit file index.
use std::fs::File;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    volume: u64,
    index: u64,
}

impl FileId {
    /// Identity of an already-open file.
    pub fn of_file(file: &File) -> io::Result<Self> {
        imp::of_file(file)
    }

    /// Identity of whatever file currently lives at `path`.
    pub fn of_path(path: &Path) -> io::Result<Self> {
        imp::of_path(path)
    }
}

#[cfg(unix)]
mod imp {
    use super::FileId;
    use std::fs::{self, File, Metadata};
    use std::io;
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    fn from_metadata(meta: &Metadata) -> FileId {
        FileId {
            volume: meta.dev(),
            index: meta.ino(),
        }
    }

    pub fn of_file(file: &File) -> io::Result<FileId> {
        Ok(from_metadata(&file.metadata()?))
    }

    pub fn of_path(path: &Path) -> io::Result<FileId> {
        Ok(from_metadata(&fs::metadata(path)?))
    }
}

#[cfg(windows)]
mod imp {
    use super::FileId;
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use std::path::Path;
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::Storage::FileSystem::{
        GetFileInformationByHandle, BY_HANDLE_FILE_INFORMATION,
    };

    pub fn of_file(file: &File) -> io::Result<FileId> {
        let mut info = BY_HANDLE_FILE_INFORMATION::default();
        // SAFETY: the handle is owned by `file`, which outlives this call, and
        // `info` is a valid out-pointer.
        unsafe { GetFileInformationByHandle(HANDLE(file.as_raw_handle() as _), &mut info) }
            .map_err(|e| io::Error::other(e.to_string()))?;
        Ok(FileId {
            volume: u64::from(info.dwVolumeSerialNumber),
            index: (u64::from(info.nFileIndexHigh) << 32) | u64::from(info.nFileIndexLow),
        })
    }

    /// Opening is the only way to get a file index on Windows. std opens with
    /// full sharing, so the log writer is not disturbed.
    pub fn of_path(path: &Path) -> io::Result<FileId> {
        of_file(&File::open(path)?)
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    use super::FileId;
    use std::fs::File;
    use std::io;
    use std::path::Path;

    // No identity source: every file looks the same, so only truncation is
    // detected as replacement on these targets.
    pub fn of_file(_file: &File) -> io::Result<FileId> {
        Ok(FileId { volume: 0, index: 0 })
    }

    pub fn of_path(path: &Path) -> io::Result<FileId> {
        std::fs::metadata(path)?;
        Ok(FileId { volume: 0, index: 0 })
    }
}
