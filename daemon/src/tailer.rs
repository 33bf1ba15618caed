/// Rotation-safe incremental reader for a growing log file.
///
/// A [`Tailer`] holds one open handle to the monitored path together with the
/// identity of the file behind it and a byte cursor. Each [`Tailer::poll`]
/// revalidates the identity before reading:
///
///   - same file, still at least as long as the cursor: read what was appended;
///   - different file at the path (rotation/replacement), or the file was
///     truncated below the cursor: finish the complete lines left in the old
///     handle, reopen the path and continue from its end;
///   - nothing at the path: finish the old handle, close it and report the
///     tailer as unavailable.
///
/// Content present when a file is (re)opened is never replayed; only bytes
/// appended afterwards are turned into lines. An unterminated trailing line is
/// held back until its newline arrives.
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{MonitorError, Result};
use crate::file_id::FileId;

struct OpenLog {
    reader: BufReader<File>,
    id: FileId,
    /// Offset of the next byte to read.
    cursor: u64,
}

impl OpenLog {
    fn open_at_end(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let id = FileId::of_file(&file)?;
        let cursor = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            reader: BufReader::new(file),
            id,
            cursor,
        })
    }
}

pub struct Tailer {
    path: PathBuf,
    handle: Option<OpenLog>,
    /// Bytes of a line whose terminating newline has not been read yet.
    partial: Vec<u8>,
    /// Complete lines already read but not yet handed out, such as lines
    /// drained from a rotated file whose replacement failed to open.
    pending: Vec<String>,
    reopen_count: u64,
}

impl Tailer {
    /// Opens `path` and positions the cursor at its current end.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let handle = OpenLog::open_at_end(&path).map_err(|e| MonitorError::log_read(&path, e))?;
        debug!(path = %path.display(), cursor = handle.cursor, "opened log");
        Ok(Self {
            path,
            handle: Some(handle),
            partial: Vec::new(),
            pending: Vec::new(),
            reopen_count: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `false` once a poll found nothing at the path.
    pub fn is_available(&self) -> bool {
        self.handle.is_some()
    }

    pub fn cursor(&self) -> Option<u64> {
        self.handle.as_ref().map(|h| h.cursor)
    }

    /// Number of times the path was reopened because its file was replaced
    /// or truncated.
    pub fn reopen_count(&self) -> u64 {
        self.reopen_count
    }

    /// Revalidates the file behind the path and returns the complete lines
    /// appended since the last poll.
    ///
    /// The returned iterator reads lazily; lines it has not yielded when it
    /// is dropped are returned by the next poll. Lines drained from a rotated
    /// file are kept across a failed reopen and returned once a poll succeeds.
    pub fn poll(&mut self) -> Result<Lines<'_>> {
        let mut carried = std::mem::take(&mut self.pending);
        if let Err(e) = self.revalidate(&mut carried) {
            self.pending = carried;
            return Err(e);
        }
        Ok(Lines::new(self, carried))
    }

    /// Checks the file behind the path, reopening it if it was replaced or
    /// truncated. Complete lines left in a discarded handle go to `carried`.
    fn revalidate(&mut self, carried: &mut Vec<String>) -> Result<()> {
        if self.handle.is_none() {
            return self.try_reopen();
        }

        match FileId::of_path(&self.path) {
            Ok(current) => {
                let replaced = self.handle.as_ref().is_some_and(|h| h.id != current);
                let truncated = !replaced && self.is_truncated()?;
                if replaced || truncated {
                    carried.extend(self.drain_old_handle());
                    info!(
                        path = %self.path.display(),
                        reason = if replaced { "replaced" } else { "truncated" },
                        "log rotated; reopening at end"
                    );
                    self.reopen_count += 1;
                    self.try_reopen()?;
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                carried.extend(self.drain_old_handle());
                info!(path = %self.path.display(), "log file disappeared");
                self.handle = None;
                Ok(())
            }
            Err(e) => Err(MonitorError::log_read(&self.path, e)),
        }
    }

    /// Opens the path at its end. A missing file leaves the tailer unavailable.
    fn try_reopen(&mut self) -> Result<()> {
        self.handle = None;
        self.partial.clear();
        match OpenLog::open_at_end(&self.path) {
            Ok(handle) => {
                debug!(path = %self.path.display(), cursor = handle.cursor, "reopened log");
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MonitorError::log_read(&self.path, e)),
        }
    }

    fn is_truncated(&self) -> Result<bool> {
        let Some(handle) = self.handle.as_ref() else {
            return Ok(false);
        };
        let len = handle
            .reader
            .get_ref()
            .metadata()
            .map_err(|e| MonitorError::log_read(&self.path, e))?
            .len();
        Ok(len < handle.cursor)
    }

    /// Reads the remaining complete lines from the current handle before it is
    /// discarded. They were written after the previous poll, so they are new.
    fn drain_old_handle(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            match self.read_line() {
                Ok(Some(line)) => lines.push(line),
                Ok(None) => break,
                Err(e) => {
                    debug!("stopped draining rotated log: {e}");
                    break;
                }
            }
        }
        if !self.partial.is_empty() {
            debug!(bytes = self.partial.len(), "discarding unterminated line from rotated log");
            self.partial.clear();
        }
        lines
    }

    /// Reads the next complete line, or `None` if only a partial line (or
    /// nothing) is available right now.
    fn read_line(&mut self) -> io::Result<Option<String>> {
        let Tailer { handle, partial, .. } = self;
        let Some(handle) = handle.as_mut() else {
            return Ok(None);
        };
        let read = handle.reader.read_until(b'\n', partial)?;
        handle.cursor += read as u64;
        if partial.last() != Some(&b'\n') {
            return Ok(None);
        }
        let line = decode_line(partial);
        partial.clear();
        Ok(Some(line))
    }
}

/// Strips the line terminator and decodes, replacing invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Lines produced by one [`Tailer::poll`].
pub struct Lines<'a> {
    tailer: &'a mut Tailer,
    carried: std::vec::IntoIter<String>,
    failed: bool,
}

impl<'a> Lines<'a> {
    fn new(tailer: &'a mut Tailer, carried: Vec<String>) -> Self {
        Self {
            tailer,
            carried: carried.into_iter(),
            failed: false,
        }
    }

    /// Whether the tailer still has an open file after this poll.
    pub fn is_available(&self) -> bool {
        self.tailer.is_available()
    }
}

impl Drop for Lines<'_> {
    fn drop(&mut self) {
        self.tailer.pending.extend(self.carried.by_ref());
    }
}

impl Iterator for Lines<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(line) = self.carried.next() {
            return Some(Ok(line));
        }
        if self.failed {
            return None;
        }
        match self.tailer.read_line() {
            Ok(line) => line.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(MonitorError::log_read(&self.tailer.path, e)))
            }
        }
    }
}
