// SessionTail - core/stats.rs
//
// Parse statistics: append-only counters per file plus an aggregate view.
//
// Every complete line fed to the parser lands in exactly one of the four
// outcome buckets (valid, malformed, skipped, oversized), so
//   valid + malformed + skipped + oversized == total_lines
// holds at all times. `schema_drift` is a sub-count of `valid`.
//
// Counters are only ever incremented or merged; nothing here decrements.

use crate::util::constants::MAX_DIAGNOSTICS_PER_FILE;
use crate::util::error::ParseError;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

/// Raw line-outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseCounters {
    pub total_lines: u64,
    pub valid_entries: u64,
    pub malformed: u64,
    pub skipped: u64,
    pub oversized: u64,
    /// Valid entries whose `type` was unrecognised.
    pub schema_drift: u64,
}

impl ParseCounters {
    pub fn record_valid(&mut self, drifted: bool) {
        self.total_lines += 1;
        self.valid_entries += 1;
        if drifted {
            self.schema_drift += 1;
        }
    }

    pub fn record_malformed(&mut self) {
        self.total_lines += 1;
        self.malformed += 1;
    }

    pub fn record_skipped(&mut self) {
        self.total_lines += 1;
        self.skipped += 1;
    }

    pub fn record_oversized(&mut self) {
        self.total_lines += 1;
        self.oversized += 1;
    }

    /// Add another set of counters into this one.
    pub fn merge(&mut self, other: &ParseCounters) {
        self.total_lines += other.total_lines;
        self.valid_entries += other.valid_entries;
        self.malformed += other.malformed;
        self.skipped += other.skipped;
        self.oversized += other.oversized;
        self.schema_drift += other.schema_drift;
    }

    /// True when every line is accounted for by exactly one outcome.
    pub fn is_balanced(&self) -> bool {
        self.valid_entries + self.malformed + self.skipped + self.oversized == self.total_lines
    }
}

/// Counters and retained diagnostics for one file.
#[derive(Debug, Clone, Default)]
pub struct FileParseStats {
    pub counters: ParseCounters,
    /// Most recent diagnostics, oldest evicted first once the cap is reached.
    pub diagnostics: VecDeque<ParseError>,
    /// Diagnostics evicted because of the cap.
    pub diagnostics_evicted: u64,
}

impl FileParseStats {
    fn push_diagnostic(&mut self, diagnostic: ParseError, cap: usize) {
        if cap == 0 {
            self.diagnostics_evicted += 1;
            return;
        }
        while self.diagnostics.len() >= cap {
            self.diagnostics.pop_front();
            self.diagnostics_evicted += 1;
        }
        self.diagnostics.push_back(diagnostic);
    }
}

/// Registry of per-file statistics, guarded by the monitor's coarse lock.
#[derive(Debug, Clone)]
pub struct ParseStatistics {
    files: BTreeMap<PathBuf, FileParseStats>,
    diagnostics_cap: usize,
}

impl Default for ParseStatistics {
    fn default() -> Self {
        Self::new(MAX_DIAGNOSTICS_PER_FILE)
    }
}

impl ParseStatistics {
    pub fn new(diagnostics_cap: usize) -> Self {
        Self {
            files: BTreeMap::new(),
            diagnostics_cap,
        }
    }

    /// Merge the outcome of one feed into the file's record. `dropped`
    /// counts diagnostics the parser already evicted for the same cap.
    pub fn record<I>(&mut self, path: &Path, delta: &ParseCounters, diagnostics: I, dropped: u64)
    where
        I: IntoIterator<Item = ParseError>,
    {
        let cap = self.diagnostics_cap;
        let stats = self.files.entry(path.to_path_buf()).or_default();
        stats.counters.merge(delta);
        stats.diagnostics_evicted += dropped;
        for d in diagnostics {
            stats.push_diagnostic(d, cap);
        }
    }

    pub fn file(&self, path: &Path) -> Option<&FileParseStats> {
        self.files.get(path)
    }

    /// Sum of all per-file counters.
    pub fn aggregate(&self) -> ParseCounters {
        let mut total = ParseCounters::default();
        for stats in self.files.values() {
            total.merge(&stats.counters);
        }
        total
    }

    /// Per-file counters in path order.
    pub fn per_file(&self) -> BTreeMap<PathBuf, ParseCounters> {
        self.files
            .iter()
            .map(|(p, s)| (p.clone(), s.counters))
            .collect()
    }
}
