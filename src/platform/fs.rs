// SessionTail - platform/fs.rs
//
// Filesystem primitives used by the monitor: stat, positioned reads and a
// bounded retry helper. Everything here is synchronous and blocking; callers
// run it on worker threads.
//
// Retry policy:
//   - `NotFound` is never retried. A vanished file is a state change, not a
//     transient fault.
//   - Every other error kind is retried up to the caller's budget with the
//     delays from RETRY_DELAYS_MS (the last delay repeats once exhausted).

use crate::util::constants::RETRY_DELAYS_MS;
use chrono::{DateTime, Utc};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::time::Duration;

/// Size and modification time of a file at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

/// Stat a regular file. Directories report `InvalidInput`.
pub fn stat(path: &Path) -> io::Result<FileStat> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    Ok(FileStat {
        size: meta.len(),
        mtime: meta.modified().ok().map(DateTime::<Utc>::from),
    })
}

/// Read up to `limit` bytes from `path` starting at byte `offset`.
///
/// Loops until `limit` bytes are read or EOF, so a short read from the OS
/// does not end the pass early.
pub fn read_bytes_at(path: &Path, offset: u64, limit: usize) -> io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Byte position just past the last `\n` in the first `size` bytes of
/// `path`, searching back at most `max_back` bytes.
///
/// Returns 0 when the whole file holds no newline, and `size` when the
/// trailing partial line is longer than `max_back`.
pub fn last_line_end(path: &Path, size: u64, max_back: u64) -> io::Result<u64> {
    const CHUNK: u64 = 64 * 1_024;
    let mut file = std::fs::File::open(path)?;
    let floor = size.saturating_sub(max_back);
    let mut end = size;
    let mut buf = Vec::new();
    while end > floor {
        let start = end.saturating_sub(CHUNK).max(floor);
        buf.resize((end - start) as usize, 0);
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        if let Some(i) = buf.iter().rposition(|&b| b == b'\n') {
            return Ok(start + i as u64 + 1);
        }
        end = start;
    }
    Ok(if floor == 0 { 0 } else { size })
}

/// Outcome of a failed retried operation.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: io::Error,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Run `op` with up to `max_retries` retries on non-`NotFound` errors.
pub fn with_retry<T, F>(
    path: &Path,
    operation: &'static str,
    max_retries: u32,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> io::Result<T>,
{
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match op() {
            Ok(value) => return Ok(value),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(RetryFailure { error, attempts })
            }
            Err(error) if attempts > max_retries => {
                return Err(RetryFailure { error, attempts })
            }
            Err(error) => {
                let idx = (attempts as usize - 1).min(RETRY_DELAYS_MS.len() - 1);
                let delay = RETRY_DELAYS_MS[idx];
                tracing::debug!(
                    file = %path.display(),
                    operation,
                    attempt = attempts,
                    delay_ms = delay,
                    error = %error,
                    "I/O error, retrying"
                );
                std::thread::sleep(Duration::from_millis(delay));
            }
        }
    }
}
