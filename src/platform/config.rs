// SessionTail - platform/config.rs
//
// Platform directory resolution and config.toml loading with validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows) and
// Library (macOS) locations.
//
// Loading rules:
//   - A missing file means defaults, silently.
//   - An unreadable or unparseable file means defaults plus one warning.
//   - Each out-of-range value produces an actionable warning and keeps its
//     default; the rest of the file still applies.
//   - Unknown keys are ignored.

use crate::app::dispatch::DropPolicy;
use crate::app::monitor::MonitorConfig;
use crate::core::parser::TextEncoding;
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::fmt::Display;
use std::path::{Path, PathBuf};

/// Resolved platform paths for configuration and state.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// e.g. ~/.config/sessiontail/
    pub config_dir: PathBuf,
    /// e.g. ~/.local/share/sessiontail/ (holds the offset checkpoint)
    pub data_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths, falling back to the current
    /// directory when they cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            let data_dir = proj_dirs.data_dir().to_path_buf();
            tracing::debug!(
                config = %config_dir.display(),
                data = %data_dir.display(),
                "Platform paths resolved"
            );
            Self {
                config_dir,
                data_dir,
            }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
                data_dir: PathBuf::from("."),
            }
        }
    }

    /// Default config.toml location.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(constants::CONFIG_FILE_NAME)
    }
}

// =============================================================================
// Raw file shape
// =============================================================================

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    pub monitor: MonitorSection,
    pub parsing: ParsingSection,
    pub dispatch: DispatchSection,
    pub logging: LoggingSection,
}

/// `[monitor]`
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    pub pattern: Option<String>,
    pub max_depth: Option<usize>,
    pub debounce_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub worker_threads: Option<usize>,
    pub max_read_bytes_per_pass: Option<usize>,
    pub max_io_retries: Option<u32>,
    pub use_os_notifications: Option<bool>,
    pub start_from_end: Option<bool>,
}

/// `[parsing]`
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct ParsingSection {
    pub max_line_bytes: Option<usize>,
    pub excerpt_chars: Option<usize>,
    /// "utf-8" or "utf-8-lossy".
    pub encoding: Option<String>,
}

/// `[dispatch]`
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    pub queue_capacity: Option<usize>,
    /// "drop-oldest" or "drop-newest".
    pub drop_policy: Option<String>,
}

/// `[logging]`
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// "error", "warn", "info", "debug" or "trace".
    pub level: Option<String>,
}

// =============================================================================
// Validated config
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    /// Level for logging init; `None` means the built-in default.
    pub log_level: Option<String>,
}

/// Parse `path` strictly. Used by `load_config`; callers wanting a hard
/// failure on a bad file can use it directly.
pub fn read_config(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate `path`. Returns the config and non-fatal warnings.
pub fn load_config(path: &Path) -> (AppConfig, Vec<String>) {
    let mut warnings = Vec::new();

    if !path.exists() {
        tracing::debug!(path = %path.display(), "No config.toml found; using defaults");
        return (AppConfig::default(), warnings);
    }

    let raw = match read_config(path) {
        Ok(raw) => raw,
        Err(e) => {
            let msg = format!("{e}. Using defaults.");
            tracing::warn!("{}", msg);
            warnings.push(msg);
            return (AppConfig::default(), warnings);
        }
    };

    tracing::info!(path = %path.display(), "Loaded config.toml");
    let config = validate_raw(raw, &mut warnings);

    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "Config validation produced warnings");
    }
    (config, warnings)
}

/// Keep `value` if within `min..=max`, otherwise warn and keep `default`.
fn ranged<T: PartialOrd + Display + Copy>(
    key: &str,
    value: Option<T>,
    min: T,
    max: T,
    default: T,
    warnings: &mut Vec<String>,
) -> T {
    match value {
        Some(v) if v >= min && v <= max => v,
        Some(v) => {
            warnings.push(format!(
                "{key} = {v} is out of range ({min}-{max}). Using default ({default})."
            ));
            default
        }
        None => default,
    }
}

fn validate_raw(raw: RawConfig, warnings: &mut Vec<String>) -> AppConfig {
    let mut config = AppConfig::default();
    let m = &mut config.monitor;

    // -- [monitor] --
    if let Some(pattern) = raw.monitor.pattern {
        match glob::Pattern::new(&pattern) {
            Ok(_) => m.pattern = pattern,
            Err(e) => warnings.push(format!(
                "[monitor] pattern = \"{pattern}\" is not a valid glob ({e}). Using default ({}).",
                constants::DEFAULT_FILE_PATTERN
            )),
        }
    }
    m.max_depth = ranged(
        "[monitor] max_depth",
        raw.monitor.max_depth,
        1,
        constants::ABSOLUTE_MAX_DEPTH,
        constants::DEFAULT_MAX_DEPTH,
        warnings,
    );
    m.debounce_ms = ranged(
        "[monitor] debounce_ms",
        raw.monitor.debounce_ms,
        constants::MIN_DEBOUNCE_MS,
        constants::MAX_DEBOUNCE_MS,
        constants::DEFAULT_DEBOUNCE_MS,
        warnings,
    );
    m.poll_interval_ms = ranged(
        "[monitor] poll_interval_ms",
        raw.monitor.poll_interval_ms,
        constants::MIN_POLL_INTERVAL_MS,
        constants::MAX_POLL_INTERVAL_MS,
        constants::DEFAULT_POLL_INTERVAL_MS,
        warnings,
    );
    m.worker_threads = ranged(
        "[monitor] worker_threads",
        raw.monitor.worker_threads,
        1,
        constants::MAX_WORKER_THREADS,
        constants::DEFAULT_WORKER_THREADS,
        warnings,
    );
    m.max_read_bytes_per_pass = ranged(
        "[monitor] max_read_bytes_per_pass",
        raw.monitor.max_read_bytes_per_pass,
        constants::MIN_READ_BYTES_PER_PASS,
        constants::MAX_READ_BYTES_PER_PASS,
        constants::DEFAULT_MAX_READ_BYTES_PER_PASS,
        warnings,
    );
    m.max_io_retries = ranged(
        "[monitor] max_io_retries",
        raw.monitor.max_io_retries,
        0,
        constants::MAX_IO_RETRIES,
        constants::DEFAULT_MAX_IO_RETRIES,
        warnings,
    );
    if let Some(v) = raw.monitor.use_os_notifications {
        m.use_os_notifications = v;
    }
    if let Some(v) = raw.monitor.start_from_end {
        m.start_from_end = v;
    }

    // -- [parsing] --
    m.parse.max_line_bytes = ranged(
        "[parsing] max_line_bytes",
        raw.parsing.max_line_bytes,
        constants::MIN_MAX_LINE_BYTES,
        constants::ABSOLUTE_MAX_LINE_BYTES,
        constants::DEFAULT_MAX_LINE_BYTES,
        warnings,
    );
    m.parse.excerpt_chars = ranged(
        "[parsing] excerpt_chars",
        raw.parsing.excerpt_chars,
        1,
        constants::DEFAULT_EXCERPT_CHARS * 10,
        constants::DEFAULT_EXCERPT_CHARS,
        warnings,
    );
    if let Some(encoding) = raw.parsing.encoding {
        match TextEncoding::from_name(&encoding) {
            Ok(_) => m.parse.encoding = encoding,
            Err(e) => warnings.push(format!("[parsing] {e}. Using default (utf-8).")),
        }
    }

    // -- [dispatch] --
    m.dispatch.queue_capacity = ranged(
        "[dispatch] queue_capacity",
        raw.dispatch.queue_capacity,
        constants::MIN_QUEUE_CAPACITY,
        constants::MAX_QUEUE_CAPACITY,
        constants::DEFAULT_QUEUE_CAPACITY,
        warnings,
    );
    if let Some(policy) = raw.dispatch.drop_policy {
        match DropPolicy::from_name(&policy) {
            Some(p) => m.dispatch.drop_policy = p,
            None => warnings.push(format!(
                "[dispatch] drop_policy = \"{policy}\" is not recognised. \
                 Expected \"drop-oldest\" or \"drop-newest\". Using default (drop-oldest)."
            )),
        }
    }

    // -- [logging] --
    if let Some(level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level);
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default (info).",
            ));
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join(constants::CONFIG_FILE_NAME);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_missing_file_gives_defaults_without_warnings() {
        let dir = TempDir::new().unwrap();
        let (config, warnings) = load_config(&dir.path().join("none.toml"));
        assert!(warnings.is_empty());
        assert_eq!(config.monitor.debounce_ms, constants::DEFAULT_DEBOUNCE_MS);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_valid_values_are_applied() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
            [monitor]
            pattern = "*.log"
            debounce_ms = 500
            use_os_notifications = false

            [parsing]
            encoding = "utf-8-lossy"

            [dispatch]
            queue_capacity = 16
            drop_policy = "drop-newest"

            [logging]
            level = "debug"

            [future]
            anything = 1
            "#,
        );
        let (config, warnings) = load_config(&path);
        assert!(warnings.is_empty(), "{warnings:?}");
        assert_eq!(config.monitor.pattern, "*.log");
        assert_eq!(config.monitor.debounce_ms, 500);
        assert!(!config.monitor.use_os_notifications);
        assert_eq!(config.monitor.parse.encoding, "utf-8-lossy");
        assert_eq!(config.monitor.dispatch.queue_capacity, 16);
        assert_eq!(config.monitor.dispatch.drop_policy, DropPolicy::DropNewest);
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(config.monitor.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_values_warn_and_default() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "[monitor]\ndebounce_ms = 1\npoll_interval_ms = 999999\n[parsing]\nencoding = \"ebcdic\"\n",
        );
        let (config, warnings) = load_config(&path);
        assert_eq!(warnings.len(), 3);
        assert_eq!(config.monitor.debounce_ms, constants::DEFAULT_DEBOUNCE_MS);
        assert_eq!(
            config.monitor.poll_interval_ms,
            constants::DEFAULT_POLL_INTERVAL_MS
        );
        assert_eq!(config.monitor.parse.encoding, constants::DEFAULT_ENCODING);
    }

    #[test]
    fn test_unparseable_file_warns_once() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "[monitor\n");
        assert!(matches!(
            read_config(&path),
            Err(ConfigError::TomlParse { .. })
        ));
        let (_, warnings) = load_config(&path);
        assert_eq!(warnings.len(), 1);
    }
}
