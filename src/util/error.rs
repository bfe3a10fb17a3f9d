// SessionTail - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// All errors keep the causal chain for diagnostic logging.
//
// Propagation policy:
//   - ConfigError is fatal at startup and is the only error `start` returns.
//   - I/O errors are retried; after the retry budget they become
//     `RetriesExhausted`, which is terminal for that file but not for the
//     monitoring handle.
//   - ParseError values are diagnostics only: they are recorded in the
//     statistics registry and never returned from `feed`.
//   - ResourceError values are counted (oversized lines, dropped events).

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all SessionTail operations.
#[derive(Debug)]
pub enum SessionTailError {
    /// Configuration or watch-root validation failed.
    Config(ConfigError),

    /// Checkpoint persistence failed.
    Checkpoint(CheckpointError),

    /// I/O error with path context.
    Io {
        path: PathBuf,
        operation: &'static str,
        source: io::Error,
    },

    /// A stat or read kept failing after every retry; the file was marked
    /// inactive.
    RetriesExhausted {
        path: PathBuf,
        operation: &'static str,
        attempts: u32,
        source: io::Error,
    },

    /// A watched root became entirely inaccessible.
    RootUnavailable { path: PathBuf, source: io::Error },
}

impl fmt::Display for SessionTailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "Configuration error: {e}"),
            Self::Checkpoint(e) => write!(f, "Checkpoint error: {e}"),
            Self::Io {
                path,
                operation,
                source,
            } => write!(
                f,
                "I/O error during {operation} on '{}': {source}",
                path.display()
            ),
            Self::RetriesExhausted {
                path,
                operation,
                attempts,
                source,
            } => write!(
                f,
                "'{}': {operation} failed after {attempts} attempts, file marked inactive: {source}",
                path.display()
            ),
            Self::RootUnavailable { path, source } => write!(
                f,
                "Watched root '{}' is no longer accessible: {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for SessionTailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Checkpoint(e) => Some(e),
            Self::Io { source, .. } => Some(source),
            Self::RetriesExhausted { source, .. } => Some(source),
            Self::RootUnavailable { source, .. } => Some(source),
        }
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors raised while validating configuration or watch roots.
#[derive(Debug)]
pub enum ConfigError {
    /// No watch roots were supplied.
    NoRoots,

    /// A watch root does not exist.
    RootNotFound { path: PathBuf },

    /// A watch root exists but cannot be read.
    RootUnreadable { path: PathBuf, source: io::Error },

    /// The file-name glob pattern does not compile.
    InvalidPattern {
        pattern: String,
        source: glob::PatternError,
    },

    /// A config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// The configured text encoding is not supported.
    UnsupportedEncoding { encoding: String },

    /// The worker pool could not be created.
    WorkerPool { threads: usize, reason: String },

    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// I/O error reading a config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRoots => write!(f, "No paths to watch were given"),
            Self::RootNotFound { path } => {
                write!(f, "Watch path '{}' does not exist", path.display())
            }
            Self::RootUnreadable { path, source } => {
                write!(f, "Watch path '{}' is not readable: {source}", path.display())
            }
            Self::InvalidPattern { pattern, source } => {
                write!(f, "Invalid file pattern '{pattern}': {source}")
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::UnsupportedEncoding { encoding } => write!(
                f,
                "Unsupported encoding '{encoding}'. Expected \"utf-8\" or \"utf-8-lossy\""
            ),
            Self::WorkerPool { threads, reason } => {
                write!(f, "Cannot start {threads} worker threads: {reason}")
            }
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::RootUnreadable { source, .. } => Some(source),
            Self::InvalidPattern { source, .. } => Some(source),
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for SessionTailError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Parse diagnostics
// ---------------------------------------------------------------------------

/// Per-line parse problems. These are always recovered: the parser records
/// them in statistics and moves on to the next line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line is not a JSON object (or not valid UTF-8 in strict mode).
    Malformed {
        file: PathBuf,
        line_number: u64,
        reason: String,
        /// Bounded raw excerpt of the offending line.
        excerpt: String,
    },

    /// The line exceeded the configured maximum length and was not parsed.
    Oversized {
        file: PathBuf,
        line_number: u64,
        length: u64,
        max: usize,
    },

    /// The `type` discriminator was not recognised; the line became an
    /// `unknown` entry.
    SchemaDrift {
        file: PathBuf,
        line_number: u64,
        discriminator: Option<String>,
    },
}

impl ParseError {
    /// 1-based line number the diagnostic refers to.
    pub fn line_number(&self) -> u64 {
        match self {
            Self::Malformed { line_number, .. }
            | Self::Oversized { line_number, .. }
            | Self::SchemaDrift { line_number, .. } => *line_number,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed {
                file,
                line_number,
                reason,
                ..
            } => write!(f, "'{}' line {line_number}: {reason}", file.display()),
            Self::Oversized {
                file,
                line_number,
                length,
                max,
            } => write!(
                f,
                "'{}' line {line_number}: {length} bytes exceeds maximum of {max}, line skipped",
                file.display()
            ),
            Self::SchemaDrift {
                file,
                line_number,
                discriminator,
            } => write!(
                f,
                "'{}' line {line_number}: unrecognised entry type {}, kept as unknown",
                file.display(),
                discriminator.as_deref().unwrap_or("<missing>")
            ),
        }
    }
}

impl std::error::Error for ParseError {}

// ---------------------------------------------------------------------------
// Resource errors
// ---------------------------------------------------------------------------

/// Resource bound violations. The affected item is dropped and counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// A subscriber queue was full and an event was discarded.
    QueueFull {
        subscription: u64,
        capacity: usize,
        policy: &'static str,
    },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull {
                subscription,
                capacity,
                policy,
            } => write!(
                f,
                "Subscription {subscription} queue full ({capacity} events), applied {policy}"
            ),
        }
    }
}

impl std::error::Error for ResourceError {}

// ---------------------------------------------------------------------------
// Checkpoint errors
// ---------------------------------------------------------------------------

/// Errors related to offset checkpoint persistence.
#[derive(Debug)]
pub enum CheckpointError {
    /// I/O error reading or writing the checkpoint file.
    Io { path: PathBuf, source: io::Error },

    /// JSON (de)serialisation failed.
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// The checkpoint was written by an incompatible schema version.
    VersionMismatch { found: u32, expected: u32 },
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "Checkpoint I/O error '{}': {source}", path.display())
            }
            Self::Json { path, source } => {
                write!(f, "Checkpoint JSON error '{}': {source}", path.display())
            }
            Self::VersionMismatch { found, expected } => {
                write!(f, "Checkpoint version {found} does not match expected {expected}")
            }
        }
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json { source, .. } => Some(source),
            Self::VersionMismatch { .. } => None,
        }
    }
}

impl From<CheckpointError> for SessionTailError {
    fn from(e: CheckpointError) -> Self {
        Self::Checkpoint(e)
    }
}

/// Convenience type alias for SessionTail results.
pub type Result<T> = std::result::Result<T, SessionTailError>;
