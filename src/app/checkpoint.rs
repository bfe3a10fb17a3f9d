// SessionTail - app/checkpoint.rs
//
// Offset checkpoints: persist how far each file was read so the next run
// resumes "since last run" instead of re-reading whole files.
//
// - Saved atomically (write temp, rename to final) so a crash during save
//   never corrupts the previous checkpoint.
// - `load` treats a missing, corrupt, or incompatible file as "no
//   checkpoint" and logs why.
// - Only consumed offsets are stored. A partial trailing line is not
//   persisted; its bytes are re-read on resume.

use crate::app::file_state::FileState;
use crate::util::constants::CHECKPOINT_FILE_NAME;
use crate::util::error::CheckpointError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Increment whenever `OffsetCheckpoint` changes incompatibly.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Stored position of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub offset: u64,
    pub size: u64,
    #[serde(default)]
    pub mtime: Option<DateTime<Utc>>,
}

/// Serializable `path -> position` map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetCheckpoint {
    pub version: u32,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub files: BTreeMap<PathBuf, CheckpointEntry>,
}

impl Default for OffsetCheckpoint {
    fn default() -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            saved_at: None,
            files: BTreeMap::new(),
        }
    }
}

impl OffsetCheckpoint {
    /// Capture the positions of `states`.
    pub fn from_states(states: &[FileState]) -> Self {
        Self {
            version: CHECKPOINT_VERSION,
            saved_at: Some(Utc::now()),
            files: states
                .iter()
                .map(|s| {
                    (
                        s.path.clone(),
                        CheckpointEntry {
                            offset: s.offset,
                            size: s.size,
                            mtime: s.mtime,
                        },
                    )
                })
                .collect(),
        }
    }

    pub fn get(&self, path: &Path) -> Option<&CheckpointEntry> {
        self.files.get(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Default checkpoint location inside the platform data directory.
pub fn checkpoint_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CHECKPOINT_FILE_NAME)
}

/// Save `checkpoint` to `path` atomically, creating parent directories.
pub fn save(checkpoint: &OffsetCheckpoint, path: &Path) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let json = serde_json::to_string_pretty(checkpoint).map_err(|source| CheckpointError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json.as_bytes()).map_err(|source| CheckpointError::Io {
        path: tmp.clone(),
        source,
    })?;

    std::fs::rename(&tmp, path).map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        CheckpointError::Io {
            path: path.to_path_buf(),
            source,
        }
    })?;

    tracing::debug!(path = %path.display(), files = checkpoint.len(), "Checkpoint saved");
    Ok(())
}

/// Read and validate a checkpoint, reporting exactly what went wrong.
pub fn read(path: &Path) -> Result<OffsetCheckpoint, CheckpointError> {
    let content = std::fs::read_to_string(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let checkpoint: OffsetCheckpoint =
        serde_json::from_str(&content).map_err(|source| CheckpointError::Json {
            path: path.to_path_buf(),
            source,
        })?;
    if checkpoint.version != CHECKPOINT_VERSION {
        return Err(CheckpointError::VersionMismatch {
            found: checkpoint.version,
            expected: CHECKPOINT_VERSION,
        });
    }
    Ok(checkpoint)
}

/// Load a checkpoint, or `None` to start fresh.
pub fn load(path: &Path) -> Option<OffsetCheckpoint> {
    match read(path) {
        Ok(checkpoint) => {
            tracing::info!(path = %path.display(), files = checkpoint.len(), "Checkpoint loaded");
            Some(checkpoint)
        }
        Err(CheckpointError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring checkpoint, starting fresh");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> OffsetCheckpoint {
        let mut cp = OffsetCheckpoint::default();
        cp.files.insert(
            PathBuf::from("/logs/a.jsonl"),
            CheckpointEntry {
                offset: 120,
                size: 150,
                mtime: None,
            },
        );
        cp
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("offsets.json");
        save(&sample(), &path).unwrap();
        let loaded = load(&path).expect("checkpoint should load");
        assert_eq!(loaded.files, sample().files);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(load(&dir.path().join("none.json")).is_none());
    }

    #[test]
    fn test_corrupt_file_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(read(&path), Err(CheckpointError::Json { .. })));
        assert!(load(&path).is_none());
    }

    #[test]
    fn test_version_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("offsets.json");
        let mut cp = sample();
        cp.version = CHECKPOINT_VERSION + 1;
        save(&cp, &path).unwrap();
        assert!(matches!(
            read(&path),
            Err(CheckpointError::VersionMismatch { .. })
        ));
        assert!(load(&path).is_none());
    }

    #[test]
    fn test_from_states_captures_offsets() {
        let state = FileState {
            path: PathBuf::from("x.jsonl"),
            offset: 7,
            size: 9,
            mtime: None,
            active: false,
            passes: 1,
            rotations: 0,
        };
        let cp = OffsetCheckpoint::from_states(&[state]);
        assert_eq!(cp.get(Path::new("x.jsonl")).unwrap().offset, 7);
    }
}
