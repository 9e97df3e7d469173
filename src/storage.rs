//! File primitives shared by the raw logs and the derived artifacts.
//!
//! - JSONL reads that keep 1-based line numbers for reporting.
//! - Tail reads that only touch the last few kilobytes of a log.
//! - Whole-file replacement through a temp file in the same directory
//!   followed by a rename, so readers never see a half-written file.
//! - Advisory exclusive locks on sibling `.lock` files.

use fs2::FileExt;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config::LockConfig;

/// Block size used when reading a log backwards.
const TAIL_BLOCK: u64 = 8 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another writer holds the lock. Retrying later may succeed.
    #[error("lock busy: {} is held by another writer", path.display())]
    LockBusy { path: PathBuf },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::LockBusy { .. })
    }
}

/// Read every non-blank line of a JSONL file as `(line_number, bytes)`.
///
/// Lines are returned undecoded so one corrupt line cannot fail the whole
/// read; callers decode each line themselves. A missing file reads as empty;
/// any other I/O failure is an error.
pub fn read_lines(path: &Path) -> Result<Vec<(usize, Vec<u8>)>, StoreError> {
    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    Ok(content
        .split(|b| *b == b'\n')
        .enumerate()
        .map(|(i, line)| (i + 1, line.strip_suffix(b"\r").unwrap_or(line)))
        .filter(|(_, line)| !line.iter().all(u8::is_ascii_whitespace))
        .map(|(n, line)| (n, line.to_vec()))
        .collect())
}

/// Read up to `max_lines` trailing non-blank lines, oldest first.
///
/// Reads backwards in fixed blocks and stops once enough lines are buffered,
/// so the cost is independent of the log length.
pub fn read_tail_lines(path: &Path, max_lines: usize) -> Result<Vec<String>, StoreError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    if max_lines == 0 {
        return Ok(Vec::new());
    }

    let len = file
        .metadata()
        .map_err(|e| StoreError::io(path, e))?
        .len();

    let mut start = len;
    let mut buf: Vec<u8> = Vec::new();
    while start > 0 {
        let step = TAIL_BLOCK.min(start);
        start -= step;
        file.seek(SeekFrom::Start(start))
            .map_err(|e| StoreError::io(path, e))?;
        let mut block = vec![0u8; step as usize];
        file.read_exact(&mut block)
            .map_err(|e| StoreError::io(path, e))?;
        block.extend_from_slice(&buf);
        buf = block;

        let newlines = buf.iter().filter(|b| **b == b'\n').count();
        if newlines > max_lines {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    // The first line is cut unless we reached the start of the file
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }
    lines.retain(|l| !l.trim().is_empty());

    let skip = lines.len().saturating_sub(max_lines);
    Ok(lines[skip..].iter().map(|l| l.to_string()).collect())
}

/// Replace `path` with `bytes` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(|e| StoreError::io(&parent, e))?;

    let mut tmp =
        tempfile::NamedTempFile::new_in(&parent).map_err(|e| StoreError::io(&parent, e))?;
    tmp.write_all(bytes).map_err(|e| StoreError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Serialize `value` as pretty JSON with a trailing newline.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    Ok(json)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    write_atomic(path, to_pretty_json(value)?.as_bytes())
}

/// Open `path` for appending, creating it and its parent if needed.
///
/// If the file ends in a partial line (a crashed writer), a newline is
/// written first so the next record starts on its own line.
pub fn open_append(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;

    let len = file.metadata().map_err(|e| StoreError::io(path, e))?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))
            .map_err(|e| StoreError::io(path, e))?;
        file.read_exact(&mut last)
            .map_err(|e| StoreError::io(path, e))?;
        if last[0] != b'\n' {
            file.write_all(b"\n").map_err(|e| StoreError::io(path, e))?;
        }
    }
    Ok(file)
}

/// Append one line (newline added) and flush it to disk.
pub fn append_line(file: &mut File, path: &Path, line: &str) -> Result<(), StoreError> {
    append_raw_line(file, path, line.as_bytes())
}

/// [`append_line`] for bytes that may not be valid UTF-8.
pub fn append_raw_line(file: &mut File, path: &Path, line: &[u8]) -> Result<(), StoreError> {
    let mut buf = Vec::with_capacity(line.len() + 1);
    buf.extend_from_slice(line);
    buf.push(b'\n');
    file.write_all(&buf).map_err(|e| StoreError::io(path, e))?;
    file.sync_data().map_err(|e| StoreError::io(path, e))
}

/// An exclusive advisory lock, released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Take the lock, retrying `retries` times before giving up with
    /// [`StoreError::LockBusy`].
    pub fn acquire(path: &Path, cfg: &LockConfig) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;

        let contended = fs2::lock_contended_error().raw_os_error();
        let mut attempt = 0;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(FileLock {
                        file,
                        path: path.to_path_buf(),
                    })
                }
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.raw_os_error() == contended =>
                {
                    if attempt >= cfg.retries {
                        return Err(StoreError::LockBusy {
                            path: path.to_path_buf(),
                        });
                    }
                    attempt += 1;
                    tracing::debug!(lock = %path.display(), attempt, "lock busy, retrying");
                    std::thread::sleep(Duration::from_millis(cfg.retry_delay_ms));
                }
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}
