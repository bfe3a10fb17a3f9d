// SessionTail - app/monitor.rs
//
// The file monitor: ties detection, scheduling, parsing, thread building and
// dispatch together behind `FileMonitor` / `MonitorHandle`.
//
// Architecture:
//   - `FileMonitor::start` validates roots and config, then spawns one poller
//     per root, an optional OS watcher, and the scheduler thread that owns a
//     `rayon` worker pool.
//   - Each scheduled job runs `Shared::process_file` for one path. The
//     scheduler guarantees at most one job per path at a time, so within a
//     file entries reach the conversation builder in byte-offset order.
//   - Shared mutable state (file registry, thread registry, statistics,
//     parser table, reported errors) lives in `Shared`, one coarse mutex per
//     structure. No lock is held while another is acquired.
//
// Failure handling:
//   - Stat/read errors are retried (platform::fs::with_retry). `NotFound`
//     marks the file inactive; an exhausted budget also marks it inactive and
//     records a reported error. Neither stops the monitor. A failed file is
//     retried only once its size or mtime changes.
//   - Reported errors are capped; the oldest are evicted first.
//   - Per-line problems never leave the parser; they land in statistics.
//
// Shutdown: `stop` sets the cancel flag, joins the pollers, waits for the
// scheduler to drain in-flight jobs, then drains subscriber queues.

use crate::app::checkpoint::OffsetCheckpoint;
use crate::app::dispatch::{
    DispatchConfig, DispatchEvent, DispatchStats, Dispatcher, EntrySink, MonitorNotice,
    SubscriptionId,
};
use crate::app::file_state::{FileRegistry, FileState, Observation};
use crate::app::lock;
use crate::app::scheduler::{run_scheduler, JobHandler};
use crate::app::watch::{run_root_poller, start_os_watcher, FileMatcher, WatchRoot};
use crate::core::conversation::{ConversationBuilder, ConversationThread};
use crate::core::model::Entry;
use crate::core::parser::{ParseConfig, StreamingParser};
use crate::core::stats::{ParseCounters, ParseStatistics};
use crate::platform::fs::{self as pfs, FileStat, RetryFailure};
use crate::util::constants;
use crate::util::error::{ConfigError, ParseError, SessionTailError};
use notify::RecommendedWatcher;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

// =============================================================================
// Configuration
// =============================================================================

/// Every tunable of the monitor. Defaults come from `util::constants`.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// File-name glob applied inside directory roots.
    pub pattern: String,
    /// Maximum recursion depth below a directory root.
    pub max_depth: usize,
    /// Quiet period after the last change event before a file is read.
    pub debounce_ms: u64,
    /// Interval of the polling walk per root.
    pub poll_interval_ms: u64,
    /// Size of the worker pool running file jobs.
    pub worker_threads: usize,
    /// Upper bound on bytes read in one pass over a file.
    pub max_read_bytes_per_pass: usize,
    /// Retries after the first failed stat/read attempt.
    pub max_io_retries: u32,
    /// Use OS change notifications in addition to polling.
    pub use_os_notifications: bool,
    /// Files seen at startup (and absent from a restored checkpoint) start
    /// at their current end.
    pub start_from_end: bool,
    pub parse: ParseConfig,
    pub dispatch: DispatchConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            pattern: constants::DEFAULT_FILE_PATTERN.to_string(),
            max_depth: constants::DEFAULT_MAX_DEPTH,
            debounce_ms: constants::DEFAULT_DEBOUNCE_MS,
            poll_interval_ms: constants::DEFAULT_POLL_INTERVAL_MS,
            worker_threads: constants::DEFAULT_WORKER_THREADS,
            max_read_bytes_per_pass: constants::DEFAULT_MAX_READ_BYTES_PER_PASS,
            max_io_retries: constants::DEFAULT_MAX_IO_RETRIES,
            use_os_notifications: true,
            start_from_end: false,
            parse: ParseConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

fn check_range<T: PartialOrd + Display>(
    field: &str,
    value: T,
    min: T,
    max: T,
) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::ValueOutOfRange {
            field: field.to_string(),
            value: value.to_string(),
            expected: format!("{min}-{max}"),
        });
    }
    Ok(())
}

impl MonitorConfig {
    /// Check every range and the pattern. The only failure `start` reports
    /// besides root validation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        FileMatcher::new(&self.pattern, self.max_depth)?;
        check_range(
            "monitor.max_depth",
            self.max_depth,
            1,
            constants::ABSOLUTE_MAX_DEPTH,
        )?;
        check_range(
            "monitor.debounce_ms",
            self.debounce_ms,
            constants::MIN_DEBOUNCE_MS,
            constants::MAX_DEBOUNCE_MS,
        )?;
        check_range(
            "monitor.poll_interval_ms",
            self.poll_interval_ms,
            constants::MIN_POLL_INTERVAL_MS,
            constants::MAX_POLL_INTERVAL_MS,
        )?;
        check_range(
            "monitor.worker_threads",
            self.worker_threads,
            1,
            constants::MAX_WORKER_THREADS,
        )?;
        check_range(
            "monitor.max_read_bytes_per_pass",
            self.max_read_bytes_per_pass,
            constants::MIN_READ_BYTES_PER_PASS,
            constants::MAX_READ_BYTES_PER_PASS,
        )?;
        check_range(
            "monitor.max_io_retries",
            self.max_io_retries,
            0,
            constants::MAX_IO_RETRIES,
        )?;
        self.parse.validate()?;
        self.dispatch.validate()?;
        Ok(())
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Point-in-time counters for the whole monitor.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsReport {
    pub aggregate: ParseCounters,
    pub per_file: BTreeMap<PathBuf, ParseCounters>,
    pub files_tracked: usize,
    pub files_active: usize,
    pub threads: usize,
    pub entries: usize,
    pub dispatch: DispatchStats,
}

// =============================================================================
// Shared state and the per-file job
// =============================================================================

struct Shared {
    config: MonitorConfig,
    registry: Mutex<FileRegistry>,
    builder: Arc<Mutex<ConversationBuilder>>,
    stats: Mutex<ParseStatistics>,
    parsers: Mutex<HashMap<PathBuf, StreamingParser>>,
    errors: Mutex<VecDeque<Arc<SessionTailError>>>,
    dispatcher: Arc<Dispatcher>,
}

impl Shared {
    fn new(
        config: MonitorConfig,
        registry: FileRegistry,
        builder: Arc<Mutex<ConversationBuilder>>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let diagnostics_cap = config.parse.max_diagnostics_per_file;
        Self {
            config,
            registry: Mutex::new(registry),
            builder,
            stats: Mutex::new(ParseStatistics::new(diagnostics_cap)),
            parsers: Mutex::new(HashMap::new()),
            errors: Mutex::new(VecDeque::new()),
            dispatcher,
        }
    }

    fn notify(&self, notice: MonitorNotice) {
        self.dispatcher.publish(DispatchEvent::Notice(notice));
    }

    fn report(&self, error: SessionTailError) {
        tracing::error!(error = %error, "Reported monitor error");
        let mut errors = lock(&self.errors);
        if errors.len() >= constants::MAX_REPORTED_ERRORS {
            errors.pop_front();
        }
        errors.push_back(Arc::new(error));
    }

    fn take_parser(&self, path: &Path) -> Option<StreamingParser> {
        if let Some(parser) = lock(&self.parsers).remove(path) {
            return Some(parser);
        }
        match StreamingParser::new(path, self.config.parse.clone()) {
            Ok(parser) => Some(parser),
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "Cannot create parser");
                None
            }
        }
    }

    fn put_parser(&self, parser: StreamingParser) {
        lock(&self.parsers).insert(parser.source().to_path_buf(), parser);
    }

    fn file_missing(&self, path: &Path) {
        lock(&self.parsers).remove(path);
        if lock(&self.registry).mark_inactive(path) {
            tracing::info!(file = %path.display(), "File removed, marked inactive");
            self.notify(MonitorNotice::FileInactive {
                path: path.to_path_buf(),
            });
        }
    }

    /// `stat` is the file's stat when a read failed, `None` when the stat
    /// itself failed. A repeat of the same failure is only logged.
    fn retries_exhausted(
        &self,
        path: &Path,
        operation: &'static str,
        failure: RetryFailure,
        stat: Option<FileStat>,
    ) {
        lock(&self.parsers).remove(path);
        if !lock(&self.registry).mark_failed(path, stat) {
            tracing::debug!(
                file = %path.display(),
                operation,
                error = %failure.error,
                "File still failing, left inactive"
            );
            return;
        }
        tracing::warn!(
            file = %path.display(),
            operation,
            attempts = failure.attempts,
            error = %failure.error,
            "I/O retries exhausted, file marked inactive"
        );
        self.notify(MonitorNotice::IoFailure {
            path: path.to_path_buf(),
            operation,
            attempts: failure.attempts,
            message: failure.error.to_string(),
        });
        self.report(SessionTailError::RetriesExhausted {
            path: path.to_path_buf(),
            operation,
            attempts: failure.attempts,
            source: failure.error,
        });
    }

    /// One pass over `path`. Returns `true` when bytes remain beyond the
    /// per-pass read cap.
    fn process_file(&self, path: &Path) -> bool {
        let retries = self.config.max_io_retries;

        // -----------------------------------------------------------------
        // 1. Stat and update the registry.
        // -----------------------------------------------------------------
        let stat = match pfs::with_retry(path, "stat", retries, || pfs::stat(path)) {
            Ok(stat) => stat,
            Err(failure) if failure.error.kind() == io::ErrorKind::NotFound => {
                self.file_missing(path);
                return false;
            }
            Err(failure) => {
                self.retries_exhausted(path, "stat", failure, None);
                return false;
            }
        };

        let observation = lock(&self.registry).observe(path, stat);
        match observation {
            Observation::New => {
                tracing::debug!(file = %path.display(), size = stat.size, "Tracking new file")
            }
            Observation::Reactivated => {
                tracing::info!(file = %path.display(), "File reappeared, active again");
                self.notify(MonitorNotice::FileReactivated {
                    path: path.to_path_buf(),
                });
            }
            Observation::Known => {}
            Observation::Suppressed => return false,
        }

        let Some(mut parser) = self.take_parser(path) else {
            return false;
        };

        // -----------------------------------------------------------------
        // 2. Rotation / truncation. Bytes the parser already buffers count
        //    as read, so a file shrinking into them is a rotation too.
        // -----------------------------------------------------------------
        let (offset, rotated_from) = {
            let mut registry = lock(&self.registry);
            let offset = registry.get(path).map_or(0, |s| s.offset);
            if stat.size < offset + parser.pending_len() {
                (0, registry.reset_for_rotation(path))
            } else {
                (offset, None)
            }
        };
        if let Some(previous_offset) = rotated_from {
            parser.reset();
            tracing::info!(
                file = %path.display(),
                previous_offset,
                new_size = stat.size,
                "File truncated or rotated, re-reading from start"
            );
            self.notify(MonitorNotice::Discontinuity {
                path: path.to_path_buf(),
                previous_offset,
                new_size: stat.size,
            });
        }

        // -----------------------------------------------------------------
        // 3. Read the new bytes (capped per pass).
        // -----------------------------------------------------------------
        let start = offset + parser.pending_len();
        if stat.size <= start {
            self.put_parser(parser);
            return false;
        }
        let want = (stat.size - start).min(self.config.max_read_bytes_per_pass as u64) as usize;

        let bytes = match pfs::with_retry(path, "read", retries, || {
            pfs::read_bytes_at(path, start, want)
        }) {
            Ok(bytes) => bytes,
            Err(failure) if failure.error.kind() == io::ErrorKind::NotFound => {
                self.file_missing(path);
                return false;
            }
            Err(failure) => {
                self.retries_exhausted(path, "read", failure, Some(stat));
                return false;
            }
        };
        if bytes.is_empty() {
            self.put_parser(parser);
            return false;
        }

        // -----------------------------------------------------------------
        // 4. Parse, advance by exactly the consumed bytes, record stats.
        // -----------------------------------------------------------------
        let result = parser.feed(&bytes);
        self.put_parser(parser);

        lock(&self.registry).advance(path, result.bytes_consumed);
        lock(&self.stats).record(
            path,
            &result.counters,
            result.diagnostics,
            result.diagnostics_dropped,
        );

        // -----------------------------------------------------------------
        // 5. Build threads, then notify subscribers.
        // -----------------------------------------------------------------
        let entries: Vec<Arc<Entry>> = result.entries.into_iter().map(Arc::new).collect();
        let produced = entries.len();
        let (outcome, revisions) = {
            let mut builder = lock(&self.builder);
            let outcome = builder.ingest_batch(entries);
            let revisions: Vec<(String, u64)> = outcome
                .touched
                .iter()
                .filter_map(|key| Some((key.clone(), builder.revision(key)?)))
                .collect();
            (outcome, revisions)
        };

        tracing::debug!(
            file = %path.display(),
            offset = start,
            read = bytes.len(),
            consumed = result.bytes_consumed,
            entries = produced,
            appended = outcome.appended.len(),
            "File pass complete"
        );

        for entry in outcome.appended {
            let session_key = entry.session_key().to_string();
            self.dispatcher.publish(DispatchEvent::EntryAppended {
                entry,
                file_path: path.to_path_buf(),
                session_key,
            });
        }
        for (session_key, revision) in revisions {
            self.dispatcher.publish(DispatchEvent::ThreadUpdated {
                session_key,
                revision,
            });
        }

        bytes.len() == want && start + (want as u64) < stat.size
    }
}

impl JobHandler for Shared {
    fn process(&self, path: &Path) -> bool {
        self.process_file(path)
    }

    fn root_unavailable(&self, root: &Path, error: &io::Error) {
        tracing::warn!(root = %root.display(), error = %error, "Watch root unavailable");
        self.notify(MonitorNotice::RootUnavailable {
            path: root.to_path_buf(),
            message: error.to_string(),
        });
        self.report(SessionTailError::RootUnavailable {
            path: root.to_path_buf(),
            source: io::Error::new(error.kind(), error.to_string()),
        });
    }

    fn root_recovered(&self, root: &Path) {
        tracing::info!(root = %root.display(), "Watch root accessible again");
    }
}

// =============================================================================
// FileMonitor (configured, not yet running)
// =============================================================================

/// Builder-style entry point. Subscriptions made here receive every event
/// from the first pass on.
pub struct FileMonitor {
    config: MonitorConfig,
    builder: Arc<Mutex<ConversationBuilder>>,
    dispatcher: Arc<Dispatcher>,
    restore: Option<OffsetCheckpoint>,
}

impl FileMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let builder = Arc::new(Mutex::new(ConversationBuilder::new()));
        let dispatcher = Arc::new(Dispatcher::with_thread_source(
            config.dispatch.clone(),
            builder.clone(),
        ));
        Self {
            config,
            builder,
            dispatcher,
            restore: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Resume from a previous run's offsets.
    pub fn restore(mut self, checkpoint: OffsetCheckpoint) -> Self {
        self.restore = Some(checkpoint);
        self
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&DispatchEvent) + Send + 'static,
    {
        self.dispatcher.subscribe(callback)
    }

    pub fn subscribe_sink<S: EntrySink>(&self, sink: S) -> SubscriptionId {
        self.dispatcher.subscribe_sink(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Validate everything and start watching `paths`.
    pub fn start<P: AsRef<Path>>(self, paths: &[P]) -> Result<MonitorHandle, ConfigError> {
        self.config.validate()?;
        if paths.is_empty() {
            return Err(ConfigError::NoRoots);
        }

        let mut roots = paths
            .iter()
            .map(|p| WatchRoot::validate(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        roots.sort_by(|a, b| a.path.cmp(&b.path));
        roots.dedup();

        let matcher = FileMatcher::new(&self.config.pattern, self.config.max_depth)?;
        let threads = self.config.worker_threads;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("sessiontail-worker-{i}"))
            .build()
            .map_err(|e| ConfigError::WorkerPool {
                threads,
                reason: e.to_string(),
            })?;

        let mut registry = FileRegistry::new();
        if let Some(checkpoint) = &self.restore {
            for (path, entry) in &checkpoint.files {
                registry.seed(path, entry.offset, entry.size, entry.mtime);
            }
            tracing::info!(files = checkpoint.len(), "Restored file offsets");
        }
        if self.config.start_from_end {
            // Start after the last complete line so a line still being
            // written is read whole once it finishes.
            let max_back = self.config.parse.max_line_bytes as u64;
            for root in &roots {
                for path in root.candidates(&matcher).unwrap_or_default() {
                    if let Ok(stat) = pfs::stat(&path) {
                        let offset = pfs::last_line_end(&path, stat.size, max_back)
                            .unwrap_or(stat.size);
                        registry.seed(&path, offset, stat.size, stat.mtime);
                    }
                }
            }
            tracing::debug!(files = registry.len(), "Existing files start at their last line end");
        }

        let shared = Arc::new(Shared::new(
            self.config.clone(),
            registry,
            Arc::clone(&self.builder),
            Arc::clone(&self.dispatcher),
        ));
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let scheduler = {
            let shared = Arc::clone(&shared);
            let tx = tx.clone();
            let cancel = Arc::clone(&cancel);
            let debounce = Duration::from_millis(self.config.debounce_ms);
            std::thread::spawn(move || run_scheduler(shared, rx, tx, pool, debounce, cancel))
        };

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let pollers = roots
            .iter()
            .map(|root| {
                let root = root.clone();
                let matcher = matcher.clone();
                let tx = tx.clone();
                let cancel = Arc::clone(&cancel);
                std::thread::spawn(move || run_root_poller(root, matcher, poll_interval, tx, cancel))
            })
            .collect();

        let watcher = if self.config.use_os_notifications {
            start_os_watcher(&roots, &matcher, tx)
        } else {
            None
        };

        tracing::info!(
            roots = roots.len(),
            pattern = %self.config.pattern,
            workers = threads,
            os_notifications = watcher.is_some(),
            "Monitoring started"
        );

        Ok(MonitorHandle {
            shared,
            cancel,
            scheduler: Some(scheduler),
            pollers,
            watcher,
            roots,
        })
    }
}

/// Start monitoring `paths` for files matching `pattern` with defaults.
pub fn start_monitoring<P: AsRef<Path>>(
    paths: &[P],
    pattern: &str,
) -> Result<MonitorHandle, ConfigError> {
    let config = MonitorConfig {
        pattern: pattern.to_string(),
        ..MonitorConfig::default()
    };
    FileMonitor::new(config).start(paths)
}

// =============================================================================
// MonitorHandle (running)
// =============================================================================

/// A running monitor. Dropping it stops monitoring.
pub struct MonitorHandle {
    shared: Arc<Shared>,
    cancel: Arc<AtomicBool>,
    scheduler: Option<JoinHandle<()>>,
    pollers: Vec<JoinHandle<()>>,
    watcher: Option<RecommendedWatcher>,
    roots: Vec<WatchRoot>,
}

impl MonitorHandle {
    /// Stop detection, finish in-flight jobs and drain subscriber queues.
    /// Idempotent.
    pub fn stop(&mut self) {
        let Some(scheduler) = self.scheduler.take() else {
            return;
        };
        self.cancel.store(true, Ordering::SeqCst);
        self.watcher = None;
        for poller in self.pollers.drain(..) {
            if poller.join().is_err() {
                tracing::warn!("Root poller panicked");
            }
        }
        if scheduler.join().is_err() {
            tracing::warn!("Scheduler panicked");
        }
        self.shared.dispatcher.shutdown();
        tracing::info!("Monitoring stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.scheduler.is_none()
    }

    /// Canonical roots being watched.
    pub fn roots(&self) -> Vec<&Path> {
        self.roots.iter().map(|r| r.path.as_path()).collect()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&DispatchEvent) + Send + 'static,
    {
        self.shared.dispatcher.subscribe(callback)
    }

    pub fn subscribe_sink<S: EntrySink>(&self, sink: S) -> SubscriptionId {
        self.shared.dispatcher.subscribe_sink(sink)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.dispatcher.unsubscribe(id)
    }

    pub fn statistics(&self) -> StatisticsReport {
        let (aggregate, per_file) = {
            let stats = lock(&self.shared.stats);
            (stats.aggregate(), stats.per_file())
        };
        let (files_tracked, files_active) = {
            let registry = lock(&self.shared.registry);
            (registry.len(), registry.active_count())
        };
        let (threads, entries) = {
            let builder = lock(&self.shared.builder);
            (builder.thread_count(), builder.entry_count())
        };
        StatisticsReport {
            aggregate,
            per_file,
            files_tracked,
            files_active,
            threads,
            entries,
            dispatch: self.shared.dispatcher.stats(),
        }
    }

    /// Read-only snapshots of every thread, sorted by session key.
    pub fn threads(&self) -> Vec<Arc<ConversationThread>> {
        lock(&self.shared.builder).threads()
    }

    pub fn thread(&self, session_key: &str) -> Option<Arc<ConversationThread>> {
        lock(&self.shared.builder).thread(session_key)
    }

    pub fn file_states(&self) -> Vec<FileState> {
        lock(&self.shared.registry).snapshot()
    }

    pub fn file_state(&self, path: &Path) -> Option<FileState> {
        lock(&self.shared.registry).get(path).cloned()
    }

    /// Current offsets, suitable for `checkpoint::save`.
    pub fn checkpoint(&self) -> OffsetCheckpoint {
        OffsetCheckpoint::from_states(&self.file_states())
    }

    /// Non-fatal errors reported so far (retry exhaustion, root loss).
    pub fn errors(&self) -> Vec<Arc<SessionTailError>> {
        lock(&self.shared.errors).iter().cloned().collect()
    }

    /// Retained per-line diagnostics for one file.
    pub fn diagnostics(&self, path: &Path) -> Vec<ParseError> {
        lock(&self.shared.stats)
            .file(path)
            .map(|f| f.diagnostics.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn shared(config: MonitorConfig) -> Shared {
        let builder = Arc::new(Mutex::new(ConversationBuilder::new()));
        let dispatcher = Arc::new(Dispatcher::with_thread_source(
            config.dispatch.clone(),
            builder.clone(),
        ));
        Shared::new(config, FileRegistry::new(), builder, dispatcher)
    }

    fn collect_notices(s: &Shared) -> mpsc::Receiver<MonitorNotice> {
        let (tx, rx) = mpsc::channel();
        s.dispatcher.subscribe(move |e| {
            if let DispatchEvent::Notice(n) = e {
                let _ = tx.send(n.clone());
            }
        });
        rx
    }

    fn append(path: &Path, text: &str) {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap()
            .write_all(text.as_bytes())
            .unwrap();
    }

    fn line(uuid: &str) -> String {
        format!("{{\"type\":\"user\",\"uuid\":\"{uuid}\",\"sessionId\":\"s\",\"message\":{{\"content\":\"x\"}}}}\n")
    }

    #[test]
    fn test_defaults_validate() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let cases = [
            MonitorConfig {
                debounce_ms: 10,
                ..MonitorConfig::default()
            },
            MonitorConfig {
                poll_interval_ms: 60_000,
                ..MonitorConfig::default()
            },
            MonitorConfig {
                worker_threads: 0,
                ..MonitorConfig::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(ConfigError::ValueOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn test_bad_pattern_is_rejected() {
        let config = MonitorConfig {
            pattern: "[".into(),
            ..MonitorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_offset_stops_before_partial_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jsonl");
        let first = line("1");
        append(&path, &first);
        append(&path, "{\"type\":\"user\"");

        let s = shared(MonitorConfig::default());
        assert!(!s.process_file(&path));
        let state = lock(&s.registry).get(&path).cloned().unwrap();
        assert_eq!(state.offset, first.len() as u64);
        assert_eq!(state.passes, 1);

        append(&path, ",\"uuid\":\"2\"}\n");
        s.process_file(&path);
        let state = lock(&s.registry).get(&path).cloned().unwrap();
        assert_eq!(state.offset, state.size);
        assert_eq!(lock(&s.builder).entry_count(), 2);
    }

    #[test]
    fn test_truncation_resets_and_rereads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jsonl");
        append(&path, &format!("{}{}", line("1"), line("2")));

        let s = shared(MonitorConfig::default());
        s.process_file(&path);
        std::fs::write(&path, line("3")).unwrap();
        s.process_file(&path);

        let state = lock(&s.registry).get(&path).cloned().unwrap();
        assert_eq!(state.rotations, 1);
        assert_eq!(state.offset, line("3").len() as u64);
        let thread = lock(&s.builder).thread("s").unwrap();
        assert!(thread.contains("3"));
        assert_eq!(thread.len(), 3);
    }

    #[test]
    fn test_read_cap_reports_more() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jsonl");
        let mut text = String::new();
        for i in 0..200 {
            text.push_str(&line(&i.to_string()));
        }
        append(&path, &text);

        let s = shared(MonitorConfig {
            max_read_bytes_per_pass: constants::MIN_READ_BYTES_PER_PASS,
            ..MonitorConfig::default()
        });
        let mut passes = 1;
        while s.process_file(&path) {
            passes += 1;
        }
        assert!(passes > 1);
        assert_eq!(lock(&s.builder).entry_count(), 200);
        assert!(lock(&s.stats).aggregate().is_balanced());
    }

    #[test]
    fn test_missing_file_marked_inactive_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jsonl");
        append(&path, &line("1"));

        let s = shared(MonitorConfig::default());
        let rx = collect_notices(&s);

        s.process_file(&path);
        std::fs::remove_file(&path).unwrap();
        s.process_file(&path);
        s.process_file(&path);
        s.dispatcher.shutdown();

        assert!(!lock(&s.registry).get(&path).unwrap().active);
        let notices: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            notices,
            vec![MonitorNotice::FileInactive { path: path.clone() }]
        );
        // Entries already emitted stay.
        assert_eq!(lock(&s.builder).entry_count(), 1);
    }

    #[test]
    fn test_stalled_subscriber_holds_no_thread_copies() {
        struct Stalled {
            started: mpsc::Sender<()>,
            gate: mpsc::Receiver<()>,
        }
        impl EntrySink for Stalled {
            fn on_entry(&mut self, _: &Arc<Entry>, _: &Path, _: &str) {
                let _ = self.started.send(());
                let _ = self.gate.recv();
            }
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jsonl");
        let s = shared(MonitorConfig::default());
        let (gate_tx, gate_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel();
        s.dispatcher.subscribe_sink(Stalled {
            started: started_tx,
            gate: gate_rx,
        });

        append(&path, &line("0"));
        s.process_file(&path);
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        for i in 1..20 {
            append(&path, &line(&i.to_string()));
            s.process_file(&path);
        }

        // Only the builder and this test hold the thread.
        let thread = lock(&s.builder).thread("s").unwrap();
        assert_eq!(thread.len(), 20);
        assert_eq!(Arc::strong_count(&thread), 2);
        // 19 entries wait behind the stalled one, plus one coalesced update.
        assert_eq!(s.dispatcher.stats().subscriptions[0].queued, 20);

        drop(gate_tx);
        s.dispatcher.shutdown();
    }

    #[test]
    fn test_exhausted_retries_mark_inactive_and_report_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jsonl");
        append(&path, &line("1"));

        let s = shared(MonitorConfig {
            max_io_retries: 0,
            ..MonitorConfig::default()
        });
        let notices = collect_notices(&s);

        s.process_file(&path);
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        assert!(!s.process_file(&path));
        assert!(!s.process_file(&path));
        assert!(!lock(&s.registry).get(&path).unwrap().active);

        // A regular file at the path again is a change, so it is retried.
        std::fs::remove_dir(&path).unwrap();
        append(&path, &format!("{}{}", line("2"), line("3")));
        s.process_file(&path);
        assert!(lock(&s.registry).get(&path).unwrap().active);
        s.dispatcher.shutdown();

        let notices: Vec<_> = notices.try_iter().collect();
        assert_eq!(notices.len(), 2);
        assert!(matches!(
            &notices[0],
            MonitorNotice::IoFailure {
                operation: "stat",
                attempts: 1,
                ..
            }
        ));
        assert_eq!(
            notices[1],
            MonitorNotice::FileReactivated { path: path.clone() }
        );

        let errors = lock(&s.errors);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0].as_ref(),
            SessionTailError::RetriesExhausted {
                operation: "stat",
                attempts: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_reported_errors_are_capped() {
        let s = shared(MonitorConfig::default());
        for i in 0..constants::MAX_REPORTED_ERRORS + 5 {
            s.report(SessionTailError::RootUnavailable {
                path: PathBuf::from(format!("root-{i}")),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        let errors = lock(&s.errors);
        assert_eq!(errors.len(), constants::MAX_REPORTED_ERRORS);
        assert!(matches!(
            errors[0].as_ref(),
            SessionTailError::RootUnavailable { path, .. } if path == Path::new("root-5")
        ));
    }

    #[test]
    fn test_start_rejects_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = start_monitoring(&[dir.path().join("missing")], "*.jsonl")
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::RootNotFound { .. }));
    }

    #[test]
    fn test_start_rejects_empty_roots() {
        let roots: [&Path; 0] = [];
        assert!(matches!(
            start_monitoring(&roots, "*.jsonl").err(),
            Some(ConfigError::NoRoots)
        ));
    }
}
