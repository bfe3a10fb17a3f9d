// SessionTail - core/parser.rs
//
// Incremental JSONL parsing. Core layer: accepts byte slices, never touches
// the filesystem.
//
// `StreamingParser::feed` takes any chunk of bytes, splits it on '\n', and
// parses every complete line. The trailing unterminated fragment is held
// until a later call completes it, so the result is identical however the
// stream is chunked. `bytes_consumed` only ever covers whole lines
// (including their newline); the caller advances its file offset by exactly
// that amount.
//
// Per-line failures never escape `feed`:
//   - blank lines are counted as skipped,
//   - lines that are not a JSON object are counted as malformed and keep a
//     bounded excerpt,
//   - lines longer than `max_line_bytes` are counted as oversized without
//     being parsed. When such a line is still incomplete its bytes are
//     discarded as they arrive, so the buffer never grows past the limit.

use crate::core::model::Entry;
use crate::core::stats::ParseCounters;
use crate::util::constants;
use crate::util::error::{ConfigError, ParseError};
use crate::util::logging::{preview, truncate_chars};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Configuration for parsing operations.
#[derive(Debug, Clone)]
pub struct ParseConfig {
    /// Lines longer than this (excluding the newline) are rejected unparsed.
    pub max_line_bytes: usize,
    /// Characters of a malformed line kept in its diagnostic.
    pub excerpt_chars: usize,
    /// Diagnostics returned per feed and retained per file.
    pub max_diagnostics_per_file: usize,
    /// "utf-8" (strict) or "utf-8-lossy".
    pub encoding: String,
}

impl Default for ParseConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: constants::DEFAULT_MAX_LINE_BYTES,
            excerpt_chars: constants::DEFAULT_EXCERPT_CHARS,
            max_diagnostics_per_file: constants::MAX_DIAGNOSTICS_PER_FILE,
            encoding: constants::DEFAULT_ENCODING.to_string(),
        }
    }
}

impl ParseConfig {
    /// Check ranges and resolve the encoding name.
    pub fn validate(&self) -> Result<TextEncoding, ConfigError> {
        if !(constants::MIN_MAX_LINE_BYTES..=constants::ABSOLUTE_MAX_LINE_BYTES)
            .contains(&self.max_line_bytes)
        {
            return Err(ConfigError::ValueOutOfRange {
                field: "parsing.max_line_bytes".to_string(),
                value: self.max_line_bytes.to_string(),
                expected: format!(
                    "{}-{}",
                    constants::MIN_MAX_LINE_BYTES,
                    constants::ABSOLUTE_MAX_LINE_BYTES
                ),
            });
        }
        TextEncoding::from_name(&self.encoding)
    }
}

/// How line bytes are decoded before JSON parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// Invalid UTF-8 makes the line malformed.
    Utf8,
    /// Invalid sequences are replaced with U+FFFD.
    Utf8Lossy,
}

impl TextEncoding {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(TextEncoding::Utf8),
            "utf-8-lossy" | "utf8-lossy" => Ok(TextEncoding::Utf8Lossy),
            _ => Err(ConfigError::UnsupportedEncoding {
                encoding: name.to_string(),
            }),
        }
    }
}

/// Output of one `feed` call.
#[derive(Debug, Default)]
pub struct FeedResult {
    /// Entries produced from the lines completed by this call, in line order.
    pub entries: Vec<Entry>,
    /// Bytes of complete lines consumed by this call, counting bytes of a
    /// partial line buffered by earlier calls once it completes.
    pub bytes_consumed: u64,
    /// Outcome counters for the lines completed by this call.
    pub counters: ParseCounters,
    /// Most recent per-line diagnostics, at most `max_diagnostics_per_file`.
    pub diagnostics: VecDeque<ParseError>,
    /// Diagnostics evicted from this call's list because of the cap.
    pub diagnostics_dropped: u64,
}

/// Restartable line parser for one byte stream.
#[derive(Debug)]
pub struct StreamingParser {
    source: PathBuf,
    config: ParseConfig,
    encoding: TextEncoding,
    /// Buffered bytes of the current incomplete line.
    partial: Vec<u8>,
    /// Length of the current incomplete line, including discarded bytes.
    partial_len: u64,
    /// The current incomplete line already exceeds the limit.
    discarding: bool,
    /// Complete lines seen since construction or the last reset.
    line_number: u64,
}

impl StreamingParser {
    /// Create a parser for the stream identified by `source`.
    ///
    /// Fails only on misconfiguration (line limit out of range, unknown
    /// encoding).
    pub fn new(source: impl Into<PathBuf>, config: ParseConfig) -> Result<Self, ConfigError> {
        let encoding = config.validate()?;
        Ok(Self {
            source: source.into(),
            config,
            encoding,
            partial: Vec::new(),
            partial_len: 0,
            discarding: false,
            line_number: 0,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Bytes of the trailing incomplete line held (or being skipped).
    /// The next read should start at `offset + pending_len()`.
    pub fn pending_len(&self) -> u64 {
        self.partial_len
    }

    /// Drop any partial line and restart line numbering. Used after the
    /// underlying file was truncated or rotated.
    pub fn reset(&mut self) {
        self.partial = Vec::new();
        self.partial_len = 0;
        self.discarding = false;
        self.line_number = 0;
    }

    /// Consume a chunk of bytes and parse every line it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> FeedResult {
        let max = self.config.max_line_bytes as u64;
        let mut result = FeedResult::default();
        let mut rest = bytes;

        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let segment = &rest[..pos];
            rest = &rest[pos + 1..];

            let line_len = self.partial_len + segment.len() as u64;
            result.bytes_consumed += line_len + 1;
            self.line_number += 1;

            if self.discarding || line_len > max {
                self.record_oversized(line_len, &mut result);
            } else if self.partial.is_empty() {
                self.process_line(segment, &mut result);
            } else {
                let mut line = std::mem::take(&mut self.partial);
                line.extend_from_slice(segment);
                self.process_line(&line, &mut result);
            }

            self.partial.clear();
            self.partial_len = 0;
            self.discarding = false;
        }

        if !rest.is_empty() {
            self.partial_len += rest.len() as u64;
            if self.discarding {
                // Still inside an oversized line.
            } else if self.partial_len > max {
                tracing::debug!(
                    file = %self.source.display(),
                    pending = self.partial_len,
                    max,
                    "Partial line exceeds limit, discarding until newline"
                );
                self.partial = Vec::new();
                self.discarding = true;
            } else {
                self.partial.extend_from_slice(rest);
            }
        }

        result
    }

    fn record_oversized(&mut self, length: u64, result: &mut FeedResult) {
        tracing::warn!(
            file = %self.source.display(),
            line = self.line_number,
            length,
            max = self.config.max_line_bytes,
            "Oversized line skipped"
        );
        result.counters.record_oversized();
        self.push_diagnostic(
            result,
            ParseError::Oversized {
                file: self.source.clone(),
                line_number: self.line_number,
                length,
                max: self.config.max_line_bytes,
            },
        );
    }

    fn process_line(&self, raw: &[u8], result: &mut FeedResult) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);

        let text: Cow<'_, str> = match self.encoding {
            TextEncoding::Utf8Lossy => String::from_utf8_lossy(raw),
            TextEncoding::Utf8 => match std::str::from_utf8(raw) {
                Ok(s) => Cow::Borrowed(s),
                Err(e) => {
                    self.record_malformed(raw, format!("invalid UTF-8: {e}"), result);
                    return;
                }
            },
        };

        if text.trim().is_empty() {
            result.counters.record_skipped();
            return;
        }

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(object)) => {
                let entry = Entry::from_object(object, &self.source, self.line_number);
                let drifted = entry.is_unknown();
                if drifted {
                    let discriminator = entry.raw_discriminator().map(str::to_string);
                    tracing::trace!(
                        file = %self.source.display(),
                        line = self.line_number,
                        discriminator = ?discriminator,
                        "Unrecognised entry type kept as unknown"
                    );
                    self.push_diagnostic(
                        result,
                        ParseError::SchemaDrift {
                            file: self.source.clone(),
                            line_number: self.line_number,
                            discriminator,
                        },
                    );
                }
                result.counters.record_valid(drifted);
                result.entries.push(entry);
            }
            Ok(other) => {
                let kind = match other {
                    Value::Null => "null",
                    Value::Bool(_) => "boolean",
                    Value::Number(_) => "number",
                    Value::String(_) => "string",
                    Value::Array(_) => "array",
                    Value::Object(_) => "object",
                };
                self.record_malformed(raw, format!("expected a JSON object, found {kind}"), result);
            }
            Err(e) => self.record_malformed(raw, e.to_string(), result),
        }
    }

    fn record_malformed(&self, raw: &[u8], reason: String, result: &mut FeedResult) {
        let lossy = String::from_utf8_lossy(raw);
        tracing::debug!(
            file = %self.source.display(),
            line = self.line_number,
            reason = %reason,
            preview = preview(&lossy),
            "Malformed line"
        );
        result.counters.record_malformed();
        let excerpt = truncate_chars(&lossy, self.config.excerpt_chars).to_string();
        self.push_diagnostic(
            result,
            ParseError::Malformed {
                file: self.source.clone(),
                line_number: self.line_number,
                reason,
                excerpt,
            },
        );
    }

    /// Keep the newest diagnostics, evicting the oldest like `ParseStatistics`.
    fn push_diagnostic(&self, result: &mut FeedResult, diagnostic: ParseError) {
        let cap = self.config.max_diagnostics_per_file;
        if cap == 0 {
            result.diagnostics_dropped += 1;
            return;
        }
        while result.diagnostics.len() >= cap {
            result.diagnostics.pop_front();
            result.diagnostics_dropped += 1;
        }
        result.diagnostics.push_back(diagnostic);
    }
}
