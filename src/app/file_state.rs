// SessionTail - app/file_state.rs
//
// Per-file read position tracking.
//
// `FileRegistry` is owned by the monitor's shared state behind a single
// mutex. Entries are created the first time a path is observed, updated in
// place by file jobs, and marked inactive (never removed) when the file
// disappears.
//
// A file whose I/O retries ran out stays inactive while its size and mtime
// are unchanged, so a persistently failing file is retried only after it
// changes.
//
// Offset rules:
//   - `offset` only grows, by exactly the bytes the parser consumed.
//   - The single exception is a rotation (`size < offset`), which resets it
//     to 0 and bumps `rotations`.

use crate::platform::fs::FileStat;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Read position and liveness of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileState {
    pub path: PathBuf,
    /// Bytes already consumed as complete lines.
    pub offset: u64,
    /// Size at the last stat.
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub active: bool,
    /// Processing passes that consumed at least one byte.
    pub passes: u64,
    /// Truncations or rotations observed.
    pub rotations: u64,
}

impl FileState {
    fn new(path: &Path, offset: u64, size: u64, mtime: Option<DateTime<Utc>>) -> Self {
        Self {
            path: path.to_path_buf(),
            offset,
            size,
            mtime,
            active: true,
            passes: 0,
            rotations: 0,
        }
    }

    /// True when the file shrank below what was already consumed.
    pub fn is_rotated(&self) -> bool {
        self.size < self.offset
    }

    /// Bytes on disk past the consumed offset.
    pub fn unread(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}

/// What `observe` changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First time this path was seen.
    New,
    /// The path was inactive and exists again.
    Reactivated,
    /// Already known and active.
    Known,
    /// Failed before and unchanged since; left inactive.
    Suppressed,
}

#[derive(Debug, Default)]
pub struct FileRegistry {
    files: HashMap<PathBuf, FileState>,
    /// Files inactive after retry exhaustion, with the stat seen at the
    /// time (`None` when the stat itself failed).
    failed: HashMap<PathBuf, Option<FileStat>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a known position without reading anything. Used for restored
    /// checkpoints and live-only starts. Existing entries are left alone.
    pub fn seed(&mut self, path: &Path, offset: u64, size: u64, mtime: Option<DateTime<Utc>>) {
        self.files
            .entry(path.to_path_buf())
            .or_insert_with(|| FileState::new(path, offset, size, mtime));
    }

    /// Record a fresh stat of `path`, creating or reactivating its state.
    pub fn observe(&mut self, path: &Path, stat: FileStat) -> Observation {
        if let Some(failed_at) = self.failed.get(path) {
            if *failed_at == Some(stat) {
                return Observation::Suppressed;
            }
            self.failed.remove(path);
        }
        match self.files.get_mut(path) {
            None => {
                self.files
                    .insert(path.to_path_buf(), FileState::new(path, 0, stat.size, stat.mtime));
                Observation::New
            }
            Some(state) => {
                state.size = stat.size;
                state.mtime = stat.mtime;
                if state.active {
                    Observation::Known
                } else {
                    state.active = true;
                    Observation::Reactivated
                }
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<&FileState> {
        self.files.get(path)
    }

    /// Reset a rotated file to the beginning. Returns the discarded offset.
    pub fn reset_for_rotation(&mut self, path: &Path) -> Option<u64> {
        let state = self.files.get_mut(path)?;
        let previous = state.offset;
        state.offset = 0;
        state.rotations += 1;
        Some(previous)
    }

    /// Advance the offset by `consumed` bytes and count the pass.
    pub fn advance(&mut self, path: &Path, consumed: u64) {
        if let Some(state) = self.files.get_mut(path) {
            state.offset += consumed;
            state.passes += 1;
        }
    }

    /// Mark a file inactive. Returns `true` if it was active before.
    pub fn mark_inactive(&mut self, path: &Path) -> bool {
        self.failed.remove(path);
        match self.files.get_mut(path) {
            Some(state) if state.active => {
                state.active = false;
                true
            }
            _ => false,
        }
    }

    /// Mark a file inactive after its retries ran out. `stat` is the last
    /// successful stat, if any. Returns `true` when this is a new failure:
    /// the file was active, untracked, or failed with a different stat.
    pub fn mark_failed(&mut self, path: &Path, stat: Option<FileStat>) -> bool {
        let was_active = match self.files.get_mut(path) {
            Some(state) => std::mem::replace(&mut state.active, false),
            None => {
                let mut state =
                    FileState::new(path, 0, stat.map_or(0, |s| s.size), stat.and_then(|s| s.mtime));
                state.active = false;
                self.files.insert(path.to_path_buf(), state);
                true
            }
        };
        let previous = self.failed.insert(path.to_path_buf(), stat);
        was_active || previous != Some(stat)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.files.values().filter(|s| s.active).count()
    }

    /// All states, sorted by path.
    pub fn snapshot(&self) -> Vec<FileState> {
        let mut states: Vec<_> = self.files.values().cloned().collect();
        states.sort_by(|a, b| a.path.cmp(&b.path));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(size: u64) -> FileStat {
        FileStat { size, mtime: None }
    }

    #[test]
    fn test_observe_creates_then_updates() {
        let mut reg = FileRegistry::new();
        let p = Path::new("a.jsonl");
        assert_eq!(reg.observe(p, stat(10)), Observation::New);
        assert_eq!(reg.get(p).unwrap().offset, 0);
        assert_eq!(reg.observe(p, stat(20)), Observation::Known);
        assert_eq!(reg.get(p).unwrap().unread(), 20);
    }

    #[test]
    fn test_rotation_resets_offset() {
        let mut reg = FileRegistry::new();
        let p = Path::new("a.jsonl");
        reg.observe(p, stat(100));
        reg.advance(p, 100);
        reg.observe(p, stat(40));
        assert!(reg.get(p).unwrap().is_rotated());

        assert_eq!(reg.reset_for_rotation(p), Some(100));
        let s = reg.get(p).unwrap();
        assert_eq!(s.offset, 0);
        assert_eq!(s.rotations, 1);
        assert!(!s.is_rotated());
    }

    #[test]
    fn test_inactive_then_reactivated() {
        let mut reg = FileRegistry::new();
        let p = Path::new("a.jsonl");
        reg.observe(p, stat(5));
        assert!(reg.mark_inactive(p));
        assert!(!reg.mark_inactive(p));
        assert_eq!(reg.active_count(), 0);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.observe(p, stat(5)), Observation::Reactivated);
        assert!(reg.get(p).unwrap().active);
    }

    #[test]
    fn test_failed_file_stays_inactive_until_changed() {
        let mut reg = FileRegistry::new();
        let p = Path::new("a.jsonl");
        reg.observe(p, stat(5));
        assert!(reg.mark_failed(p, Some(stat(5))));
        assert!(!reg.mark_failed(p, Some(stat(5))));

        assert_eq!(reg.observe(p, stat(5)), Observation::Suppressed);
        assert!(!reg.get(p).unwrap().active);

        assert_eq!(reg.observe(p, stat(8)), Observation::Reactivated);
        assert!(reg.get(p).unwrap().active);
        assert!(reg.mark_failed(p, Some(stat(8))));
    }

    #[test]
    fn test_failed_stat_is_recorded_once() {
        let mut reg = FileRegistry::new();
        let p = Path::new("dir.jsonl");
        assert!(reg.mark_failed(p, None));
        assert!(!reg.mark_failed(p, None));
        assert_eq!(reg.active_count(), 0);
        assert_eq!(reg.len(), 1);
        // Any successful stat is a change from a failing one.
        assert_eq!(reg.observe(p, stat(1)), Observation::Reactivated);
    }

    #[test]
    fn test_seed_does_not_overwrite() {
        let mut reg = FileRegistry::new();
        let p = Path::new("a.jsonl");
        reg.seed(p, 50, 50, None);
        reg.seed(p, 0, 0, None);
        assert_eq!(reg.get(p).unwrap().offset, 50);
    }
}
