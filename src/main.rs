// SessionTail - main.rs
//
// Command-line entry point. Handles:
// 1. CLI argument parsing
// 2. Config loading and logging initialisation (debug mode support)
// 3. Offset checkpoint restore
// 4. Printing the live entry feed until Enter / EOF on stdin
// 5. Final statistics and checkpoint save

use clap::Parser;
use sessiontail::app::checkpoint;
use sessiontail::platform::config::{load_config, PlatformPaths};
use sessiontail::util::error::Result;
use sessiontail::util::{constants, logging};
use sessiontail::{
    ConversationThread, Entry, EntrySink, FileMonitor, MonitorConfig, MonitorNotice,
    SessionTailError, StatisticsReport,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// SessionTail - live reader for JSONL agent conversation logs.
///
/// Watches files and directories, parses new lines as they are appended and
/// prints each entry with its conversation thread.
#[derive(Parser, Debug)]
#[command(name = "sessiontail", version, about)]
struct Cli {
    /// Files or directories to watch.
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// File-name glob used inside directories (overrides config).
    #[arg(short = 'p', long = "pattern")]
    pattern: Option<String>,

    /// Path to config.toml (defaults to the platform config directory).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Offset checkpoint file (defaults to the platform data directory).
    #[arg(short = 's', long = "state-file")]
    state_file: Option<PathBuf>,

    /// Start newly discovered files at their current end.
    #[arg(long = "from-end")]
    from_end: bool,

    /// Print entries as JSON lines instead of a text summary.
    #[arg(long = "json")]
    json: bool,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

/// Prints entries to stdout and notices to stderr.
struct ConsoleSink {
    json: bool,
}

impl EntrySink for ConsoleSink {
    fn on_entry(&mut self, entry: &Arc<Entry>, file_path: &Path, session_key: &str) {
        if self.json {
            match serde_json::to_string(entry.as_ref()) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialise entry"),
            }
            return;
        }
        let time = entry
            .timestamp
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "--:--:--".to_string());
        let text = entry.text();
        println!(
            "{time} [{session_key}] {:<11} {}  ({}:{})",
            entry.entry_type.label(),
            logging::preview(text.lines().next().unwrap_or("")),
            file_path.display(),
            entry.line_number,
        );
    }

    fn on_thread_updated(&mut self, thread: &Arc<ConversationThread>) {
        tracing::debug!(
            session = thread.session_key(),
            entries = thread.len(),
            revision = thread.revision(),
            "Thread updated"
        );
    }

    fn on_notice(&mut self, notice: &MonitorNotice) {
        eprintln!("! {notice}");
    }
}

fn main() {
    let cli = Cli::parse();

    let platform_paths = PlatformPaths::resolve();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| platform_paths.config_file());
    let (app_config, warnings) = load_config(&config_path);

    logging::init(cli.debug, app_config.log_level.as_deref());
    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        "SessionTail starting"
    );
    for warning in &warnings {
        tracing::warn!("{}", warning);
    }

    let mut config = app_config.monitor;
    if let Some(pattern) = cli.pattern.clone() {
        config.pattern = pattern;
    }
    if cli.from_end {
        config.start_from_end = true;
    }
    let state_file = cli
        .state_file
        .clone()
        .unwrap_or_else(|| checkpoint::checkpoint_path(&platform_paths.data_dir));

    if let Err(e) = run(&cli, config, &state_file) {
        tracing::error!(error = %e, "SessionTail failed");
        eprintln!("Error: {e}");
        let code = if matches!(e, SessionTailError::Config(_)) { 2 } else { 1 };
        std::process::exit(code);
    }
}

/// Monitor until Enter / EOF, then report and persist offsets.
fn run(cli: &Cli, config: MonitorConfig, state_file: &Path) -> Result<()> {
    let mut monitor = FileMonitor::new(config);
    if let Some(saved) = checkpoint::load(state_file) {
        tracing::info!(files = saved.len(), path = %state_file.display(), "Restoring offsets");
        monitor = monitor.restore(saved);
    }
    monitor.subscribe_sink(ConsoleSink { json: cli.json });

    let mut handle = monitor.start(cli.paths.as_slice())?;

    eprintln!(
        "Watching {} root(s). Press Enter to stop.",
        handle.roots().len()
    );
    let mut line = String::new();
    let waited = std::io::stdin().read_line(&mut line);

    handle.stop();
    print_report(&handle.statistics());
    checkpoint::save(&handle.checkpoint(), state_file)?;

    waited.map_err(|source| SessionTailError::Io {
        path: PathBuf::from("<stdin>"),
        operation: "read",
        source,
    })?;
    Ok(())
}

fn print_report(report: &StatisticsReport) {
    let totals = &report.aggregate;
    eprintln!(
        "{} lines: {} valid ({} schema drift), {} malformed, {} skipped, {} oversized",
        totals.total_lines,
        totals.valid_entries,
        totals.schema_drift,
        totals.malformed,
        totals.skipped,
        totals.oversized,
    );
    eprintln!(
        "{} threads, {} entries, {} files ({} active), {} events dropped",
        report.threads,
        report.entries,
        report.files_tracked,
        report.files_active,
        report.dispatch.dropped,
    );
}
