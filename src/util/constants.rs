// SessionTail - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every configurable value has a default plus an inclusive [MIN, MAX] range
// that `MonitorConfig::validate` and the config.toml loader enforce.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "SessionTail";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "SessionTail";

/// Current application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Watch roots and discovery
// =============================================================================

/// Default file-name glob for conversation logs.
pub const DEFAULT_FILE_PATTERN: &str = "*.jsonl";

/// Maximum directory recursion depth below each watched root.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Hard upper bound on max depth (prevents runaway traversal).
pub const ABSOLUTE_MAX_DEPTH: usize = 50;

// =============================================================================
// Debounce and detection
// =============================================================================

/// Quiet period after the last change event before a file is processed (ms).
pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Minimum user-configurable debounce window (ms).
pub const MIN_DEBOUNCE_MS: u64 = 50;

/// Maximum user-configurable debounce window (ms).
pub const MAX_DEBOUNCE_MS: u64 = 5_000;

/// How often each root's polling loop re-walks the tree (ms).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

/// Minimum user-configurable poll interval (ms).
pub const MIN_POLL_INTERVAL_MS: u64 = 1_000;

/// Maximum user-configurable poll interval (ms).
pub const MAX_POLL_INTERVAL_MS: u64 = 5_000;

/// How often background loops wake to check the cancel flag (ms).
pub const CANCEL_CHECK_INTERVAL_MS: u64 = 50;

// =============================================================================
// Worker pool and reads
// =============================================================================

/// Default number of per-file processing workers.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Maximum user-configurable worker count.
pub const MAX_WORKER_THREADS: usize = 64;

/// Maximum bytes read from a single file in one processing pass.
/// A larger backlog is drained by immediately rescheduling the path.
pub const DEFAULT_MAX_READ_BYTES_PER_PASS: usize = 512 * 1_024; // 512 KiB

/// Minimum user-configurable read size per pass.
pub const MIN_READ_BYTES_PER_PASS: usize = 4 * 1_024; // 4 KiB

/// Maximum user-configurable read size per pass.
pub const MAX_READ_BYTES_PER_PASS: usize = 64 * 1_024 * 1_024; // 64 MiB

/// Number of retries for a failing stat/read before the file is marked inactive.
pub const DEFAULT_MAX_IO_RETRIES: u32 = 3;

/// Maximum user-configurable retry budget.
pub const MAX_IO_RETRIES: u32 = 10;

/// Backoff schedule between I/O retries (ms). Attempts beyond the table
/// reuse the last (capped) delay.
pub const RETRY_DELAYS_MS: [u64; 3] = [50, 100, 200];

/// Reported monitor errors kept for `MonitorHandle::errors`. Older ones are
/// evicted first.
pub const MAX_REPORTED_ERRORS: usize = 256;

// =============================================================================
// Parsing limits
// =============================================================================

/// Maximum length of a single JSONL line in bytes. Longer lines are counted
/// as oversized and never parsed.
pub const DEFAULT_MAX_LINE_BYTES: usize = 4 * 1_024 * 1_024; // 4 MiB

/// Minimum user-configurable line length limit.
pub const MIN_MAX_LINE_BYTES: usize = 1_024;

/// Maximum user-configurable line length limit.
pub const ABSOLUTE_MAX_LINE_BYTES: usize = 256 * 1_024 * 1_024; // 256 MiB

/// Number of characters of a malformed line kept for diagnostics.
pub const DEFAULT_EXCERPT_CHARS: usize = 1_000;

/// Maximum number of diagnostics retained per file. Counters keep counting
/// after the cap; only the detail records are suppressed.
pub const MAX_DIAGNOSTICS_PER_FILE: usize = 1_000;

/// Default text encoding name for log files.
pub const DEFAULT_ENCODING: &str = "utf-8";

// =============================================================================
// Conversation threads
// =============================================================================

/// Session key used for entries that carry no session id.
pub const NO_SESSION_KEY: &str = "(no-session)";

// =============================================================================
// Dispatch / backpressure
// =============================================================================

/// Default capacity of each subscriber's event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;

/// Minimum user-configurable queue capacity.
pub const MIN_QUEUE_CAPACITY: usize = 1;

/// Maximum user-configurable queue capacity.
pub const MAX_QUEUE_CAPACITY: usize = 1_000_000;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Maximum length of a raw log line included in debug output.
pub const DEBUG_MAX_LINE_PREVIEW: usize = 200;

// =============================================================================
// Configuration and persistence
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Offset checkpoint file name (stored in the platform data directory).
pub const CHECKPOINT_FILE_NAME: &str = "offsets.json";
