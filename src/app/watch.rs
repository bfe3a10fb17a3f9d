// SessionTail - app/watch.rs
//
// Change detection for watched roots.
//
// Architecture:
//   - One polling thread per root walks the tree every poll interval and
//     compares (size, mtime) against the previous walk. Any difference, new
//     file, or vanished file is sent to the scheduler as `Touched(path)`.
//   - Optionally a `notify` watcher covers all roots and sends `Touched` as
//     soon as the OS reports a change. Polling keeps running either way, so
//     a platform without usable notifications still works.
//   - Detection never reads file contents and never blocks on the
//     scheduler; it only sends messages.
//
// A root that becomes unreadable is reported once; every file seen under it
// is touched so the file jobs can mark them inactive. Recovery is reported
// when the next walk succeeds.

use crate::app::scheduler::SchedulerMsg;
use crate::platform::fs::{self, FileStat};
use crate::util::constants::CANCEL_CHECK_INTERVAL_MS;
use crate::util::error::ConfigError;
use glob::Pattern;
use notify::event::EventKind;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

// =============================================================================
// Matching
// =============================================================================

/// File-name glob plus recursion depth.
#[derive(Debug, Clone)]
pub struct FileMatcher {
    pattern: Pattern,
    max_depth: usize,
}

impl FileMatcher {
    pub fn new(pattern: &str, max_depth: usize) -> Result<Self, ConfigError> {
        let compiled = Pattern::new(pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: compiled,
            max_depth,
        })
    }

    /// Match the file name only, never the directory part.
    pub fn matches_name(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .map(|n| self.pattern.matches(n))
            .unwrap_or(false)
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
}

// =============================================================================
// Roots
// =============================================================================

/// A validated watch root: a directory tree or a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRoot {
    /// Canonical path.
    pub path: PathBuf,
    pub is_file: bool,
}

impl WatchRoot {
    /// Check that `raw` exists and is readable, and canonicalise it.
    pub fn validate(raw: &Path) -> Result<Self, ConfigError> {
        let meta = match std::fs::metadata(raw) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::RootNotFound {
                    path: raw.to_path_buf(),
                })
            }
            Err(source) => {
                return Err(ConfigError::RootUnreadable {
                    path: raw.to_path_buf(),
                    source,
                })
            }
        };

        let readable = if meta.is_dir() {
            std::fs::read_dir(raw).map(|_| ())
        } else {
            std::fs::File::open(raw).map(|_| ())
        };
        readable.map_err(|source| ConfigError::RootUnreadable {
            path: raw.to_path_buf(),
            source,
        })?;

        let path = std::fs::canonicalize(raw).map_err(|source| ConfigError::RootUnreadable {
            path: raw.to_path_buf(),
            source,
        })?;

        Ok(Self {
            path,
            is_file: !meta.is_dir(),
        })
    }

    /// Matching files currently under this root. A single-file root always
    /// yields itself, whatever the pattern says.
    pub fn candidates(&self, matcher: &FileMatcher) -> io::Result<Vec<PathBuf>> {
        if self.is_file {
            return Ok(vec![self.path.clone()]);
        }
        // Surface an unreadable root as an error; walk errors below it are
        // per-entry and skipped.
        std::fs::read_dir(&self.path)?;

        Ok(walkdir::WalkDir::new(&self.path)
            .max_depth(matcher.max_depth())
            .follow_links(false)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .filter(|p| matcher.matches_name(p))
            .collect())
    }

    /// Whether an OS-reported path belongs to this root.
    pub fn accepts(&self, path: &Path, matcher: &FileMatcher) -> bool {
        if self.is_file {
            return path == self.path;
        }
        match path.strip_prefix(&self.path) {
            Ok(rel) => {
                let depth = rel.components().count();
                depth >= 1 && depth <= matcher.max_depth() && matcher.matches_name(path)
            }
            Err(_) => false,
        }
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Poll `root` until `cancel` is set or the scheduler goes away.
pub fn run_root_poller(
    root: WatchRoot,
    matcher: FileMatcher,
    poll_interval: Duration,
    tx: mpsc::Sender<SchedulerMsg>,
    cancel: Arc<AtomicBool>,
) {
    let cancel_check = Duration::from_millis(CANCEL_CHECK_INTERVAL_MS);
    let slices = u32::try_from((poll_interval.as_millis() / cancel_check.as_millis()).max(1))
        .unwrap_or(u32::MAX);

    let mut seen: HashMap<PathBuf, FileStat> = HashMap::new();
    let mut unavailable = false;

    tracing::debug!(root = %root.path.display(), "Root poller running");

    loop {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        let mut outbox = Vec::new();
        match root.candidates(&matcher) {
            Err(error) => {
                if !unavailable {
                    unavailable = true;
                    outbox.push(SchedulerMsg::RootUnavailable {
                        root: root.path.clone(),
                        error,
                    });
                }
                outbox.extend(seen.drain().map(|(p, _)| SchedulerMsg::Touched(p)));
            }
            Ok(paths) => {
                if unavailable {
                    unavailable = false;
                    outbox.push(SchedulerMsg::RootRecovered {
                        root: root.path.clone(),
                    });
                }
                let current: HashMap<PathBuf, FileStat> = paths
                    .into_iter()
                    .filter_map(|p| fs::stat(&p).ok().map(|s| (p, s)))
                    .collect();
                for (path, stat) in &current {
                    if seen.get(path) != Some(stat) {
                        outbox.push(SchedulerMsg::Touched(path.clone()));
                    }
                }
                for path in seen.keys() {
                    if !current.contains_key(path) {
                        outbox.push(SchedulerMsg::Touched(path.clone()));
                    }
                }
                seen = current;
            }
        }

        for msg in outbox {
            if tx.send(msg).is_err() {
                return;
            }
        }

        for _ in 0..slices {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            std::thread::sleep(cancel_check);
        }
    }

    tracing::debug!(root = %root.path.display(), "Root poller stopped");
}

// =============================================================================
// OS notifications
// =============================================================================

/// Start one `notify` watcher covering every root. Returns `None` when the
/// platform watcher cannot be created; polling continues regardless.
pub fn start_os_watcher(
    roots: &[WatchRoot],
    matcher: &FileMatcher,
    tx: mpsc::Sender<SchedulerMsg>,
) -> Option<RecommendedWatcher> {
    let cb_roots = roots.to_vec();
    let cb_matcher = matcher.clone();

    let created = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Access(_)) {
                    return;
                }
                for path in event.paths {
                    if cb_roots.iter().any(|r| r.accepts(&path, &cb_matcher)) {
                        let _ = tx.send(SchedulerMsg::Touched(path));
                    }
                }
            }
            Err(e) => tracing::debug!(error = %e, "OS watcher error"),
        },
        notify::Config::default(),
    );

    let mut watcher = match created {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "OS notifications unavailable, polling only");
            return None;
        }
    };

    for root in roots {
        // Watch a file root through its directory so rotation by rename is
        // still seen.
        let (target, mode) = if root.is_file {
            (
                root.path.parent().unwrap_or(&root.path),
                RecursiveMode::NonRecursive,
            )
        } else {
            (root.path.as_path(), RecursiveMode::Recursive)
        };
        if let Err(e) = watcher.watch(target, mode) {
            tracing::warn!(
                root = %root.path.display(),
                error = %e,
                "Cannot register OS watch, polling only for this root"
            );
        }
    }

    Some(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    #[test]
    fn test_invalid_pattern_is_config_error() {
        assert!(matches!(
            FileMatcher::new("[", 3),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = WatchRoot::validate(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ConfigError::RootNotFound { .. }));
    }

    #[test]
    fn test_candidates_respect_pattern_and_depth() {
        let dir = TempDir::new().unwrap();
        let deep = dir.path().join("a").join("b");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::write(dir.path().join("top.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        std::fs::write(dir.path().join("a").join("mid.jsonl"), "").unwrap();
        std::fs::write(deep.join("deep.jsonl"), "").unwrap();

        let root = WatchRoot::validate(dir.path()).unwrap();
        let matcher = FileMatcher::new("*.jsonl", 2).unwrap();
        let mut names: Vec<String> = root
            .candidates(&matcher)
            .unwrap()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        assert_eq!(names, vec!["mid.jsonl", "top.jsonl"]);
    }

    #[test]
    fn test_single_file_root_ignores_pattern() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("session.log");
        std::fs::write(&file, "").unwrap();
        let root = WatchRoot::validate(&file).unwrap();
        assert!(root.is_file);
        let matcher = FileMatcher::new("*.jsonl", 1).unwrap();
        assert_eq!(root.candidates(&matcher).unwrap(), vec![root.path.clone()]);
        assert!(root.accepts(&root.path, &matcher));
    }

    #[test]
    fn test_accepts_checks_prefix_and_depth() {
        let root = WatchRoot {
            path: PathBuf::from("/logs"),
            is_file: false,
        };
        let matcher = FileMatcher::new("*.jsonl", 1).unwrap();
        assert!(root.accepts(Path::new("/logs/a.jsonl"), &matcher));
        assert!(!root.accepts(Path::new("/logs/x/a.jsonl"), &matcher));
        assert!(!root.accepts(Path::new("/other/a.jsonl"), &matcher));
        assert!(!root.accepts(Path::new("/logs/a.txt"), &matcher));
    }

    #[test]
    fn test_poller_reports_new_and_changed_files() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.jsonl");
        std::fs::write(&file, "{}\n").unwrap();

        let root = WatchRoot::validate(dir.path()).unwrap();
        let matcher = FileMatcher::new("*.jsonl", 3).unwrap();
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = std::thread::spawn(move || {
            run_root_poller(root, matcher, Duration::from_millis(100), tx, flag)
        });

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, SchedulerMsg::Touched(ref p) if p.ends_with("a.jsonl")));

        std::fs::write(&file, "{}\n{}\n").unwrap();
        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(second, SchedulerMsg::Touched(_)));

        cancel.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn test_poller_reports_root_loss_once_then_recovery() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir(&logs).unwrap();
        std::fs::write(logs.join("a.jsonl"), "{}\n").unwrap();

        let root = WatchRoot::validate(&logs).unwrap();
        let matcher = FileMatcher::new("*.jsonl", 3).unwrap();
        let (tx, rx) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = std::thread::spawn(move || {
            run_root_poller(root, matcher, Duration::from_millis(100), tx, flag)
        });
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(first, SchedulerMsg::Touched(_)));

        // Several poll cycles pass while the root is gone.
        std::fs::remove_dir_all(&logs).unwrap();
        let mut unavailable = 0;
        let mut rechecked = false;
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(500)) {
                Ok(SchedulerMsg::RootUnavailable { .. }) => unavailable += 1,
                Ok(SchedulerMsg::Touched(p)) => rechecked |= p.ends_with("a.jsonl"),
                Ok(_) => {}
                Err(_) if unavailable > 0 => break,
                Err(_) => {}
            }
        }
        assert_eq!(unavailable, 1);
        assert!(rechecked);

        std::fs::create_dir(&logs).unwrap();
        let recovered = loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(SchedulerMsg::RootRecovered { root }) => break root,
                Ok(SchedulerMsg::RootUnavailable { .. }) => panic!("root loss reported twice"),
                Ok(_) => {}
                Err(e) => panic!("no recovery: {e}"),
            }
        };
        assert!(recovered.ends_with("logs"));

        cancel.store(true, Ordering::SeqCst);
        handle.join().unwrap();
    }
}
