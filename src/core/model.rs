// SessionTail - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no threading.
//
// An `Entry` is built once from a decoded JSON object and never mutated
// afterwards; it is shared downstream as `Arc<Entry>`. Field extraction is
// tolerant: the agent writes camelCase keys (`sessionId`, `parentUuid`) but
// snake_case spellings are accepted too, and anything the model does not
// name is kept in a raw map rather than dropped.

use crate::util::constants::NO_SESSION_KEY;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

// =============================================================================
// Entry type
// =============================================================================

/// Kind of conversation event. Always set; unrecognised discriminators map
/// to `Unknown` instead of being rejected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    System,
    #[default]
    Unknown,
}

impl EntryType {
    /// Returns all variants in display order.
    pub fn all() -> &'static [EntryType] {
        &[
            EntryType::User,
            EntryType::Assistant,
            EntryType::ToolCall,
            EntryType::ToolResult,
            EntryType::System,
            EntryType::Unknown,
        ]
    }

    /// Wire-format label.
    pub fn label(&self) -> &'static str {
        match self {
            EntryType::User => "user",
            EntryType::Assistant => "assistant",
            EntryType::ToolCall => "tool_call",
            EntryType::ToolResult => "tool_result",
            EntryType::System => "system",
            EntryType::Unknown => "unknown",
        }
    }

    /// Map a raw `type` discriminator onto a known kind.
    pub fn from_discriminator(raw: &str) -> Self {
        match raw {
            "user" => EntryType::User,
            "assistant" => EntryType::Assistant,
            "tool_call" | "tool_use" => EntryType::ToolCall,
            "tool_result" => EntryType::ToolResult,
            "system" => EntryType::System,
            _ => EntryType::Unknown,
        }
    }
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Content blocks
// =============================================================================

/// One normalised piece of message content.
///
/// Plain-string content becomes a single `Text` block; structured arrays map
/// block by block. Block kinds the model does not know are kept as `Other`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: Option<String>,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: Option<String>,
        content: String,
        is_error: bool,
    },
    Other {
        kind: String,
        raw: Value,
    },
}

impl ContentBlock {
    /// Build a block from one element of a content array.
    pub fn from_value(value: &Value) -> Self {
        let obj = match value {
            Value::String(s) => return ContentBlock::Text { text: s.clone() },
            Value::Object(obj) => obj,
            other => {
                return ContentBlock::Other {
                    kind: "value".to_string(),
                    raw: other.clone(),
                }
            }
        };

        let kind = obj.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "text" => ContentBlock::Text {
                text: str_field(obj, "text").unwrap_or_default(),
            },
            "thinking" => ContentBlock::Thinking {
                thinking: str_field(obj, "thinking").unwrap_or_default(),
            },
            "tool_use" => ContentBlock::ToolUse {
                id: str_field(obj, "id"),
                name: str_field(obj, "name").unwrap_or_default(),
                input: obj.get("input").cloned().unwrap_or(Value::Null),
            },
            "tool_result" => ContentBlock::ToolResult {
                tool_use_id: str_field(obj, "tool_use_id"),
                content: flatten_tool_result(obj.get("content")),
                is_error: obj.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            },
            other => ContentBlock::Other {
                kind: if other.is_empty() {
                    "untyped".to_string()
                } else {
                    other.to_string()
                },
                raw: value.clone(),
            },
        }
    }

    /// Text carried by this block, if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::ToolResult { content, .. } => Some(content),
            _ => None,
        }
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult { .. })
    }
}

/// Normalise a `content` value (string, array of blocks, single block
/// object, or absent) into a block list.
pub fn normalize_content(value: Option<&Value>) -> Vec<ContentBlock> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) if s.is_empty() => Vec::new(),
        Some(Value::String(s)) => vec![ContentBlock::Text { text: s.clone() }],
        Some(Value::Array(items)) => items.iter().map(ContentBlock::from_value).collect(),
        Some(other) => vec![ContentBlock::from_value(other)],
    }
}

/// Tool results carry either a string or a nested block array; reduce both
/// to plain text.
fn flatten_tool_result(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.clone()),
                Value::Object(obj) => str_field(obj, "text"),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

// =============================================================================
// Entry payload (schema-drift tolerant tagged union)
// =============================================================================

/// Fields modelled for recognised entry kinds.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct KnownFields {
    pub role: Option<String>,
    pub model: Option<String>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub version: Option<String>,
    pub request_id: Option<String>,
    pub is_sidechain: bool,
    /// Top-level keys (and leftover `message` keys) the model does not name.
    pub extra: Map<String, Value>,
}

/// Payload selected by the `type` discriminator at parse time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum EntryPayload {
    Known(KnownFields),
    /// The complete original object for unrecognised kinds.
    Unknown(Map<String, Value>),
}

// =============================================================================
// Entry
// =============================================================================

/// One parsed conversation event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entry {
    pub uuid: Option<String>,
    pub entry_type: EntryType,
    pub timestamp: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    pub parent_uuid: Option<String>,
    pub content: Vec<ContentBlock>,
    pub payload: EntryPayload,
    /// File the line was read from.
    pub source_file: PathBuf,
    /// 1-based line number within the current generation of the file
    /// (restarts at 1 after a rotation).
    pub line_number: u64,
}

/// Keys pulled out of a known object into typed fields; everything else
/// lands in `KnownFields::extra`.
const MODELLED_KEYS: &[&str] = &[
    "type",
    "uuid",
    "sessionId",
    "session_id",
    "parentUuid",
    "parent_uuid",
    "timestamp",
    "message",
    "content",
    "cwd",
    "gitBranch",
    "git_branch",
    "version",
    "requestId",
    "request_id",
    "isSidechain",
    "is_sidechain",
];

impl Entry {
    /// Build an entry from a decoded JSON object. Never fails: missing or
    /// mistyped fields become `None`, and an unrecognised discriminator
    /// yields an `Unknown` entry that keeps the full object.
    pub fn from_object(object: Map<String, Value>, source_file: &Path, line_number: u64) -> Self {
        let discriminator = object.get("type").and_then(Value::as_str);
        let message = object.get("message").and_then(Value::as_object);

        let content_value = message
            .and_then(|m| m.get("content"))
            .or_else(|| object.get("content"));
        let content = normalize_content(content_value);

        let entry_type = classify(discriminator, &content);
        let uuid = str_field_any(&object, &["uuid"]);
        let session_id = str_field_any(&object, &["sessionId", "session_id"]);
        let parent_uuid = str_field_any(&object, &["parentUuid", "parent_uuid"]);
        let timestamp = object.get("timestamp").and_then(parse_timestamp);

        let payload = if entry_type == EntryType::Unknown {
            EntryPayload::Unknown(object)
        } else {
            EntryPayload::Known(known_fields(&object, message))
        };

        Entry {
            uuid,
            entry_type,
            timestamp,
            session_id,
            parent_uuid,
            content,
            payload,
            source_file: source_file.to_path_buf(),
            line_number,
        }
    }

    /// Thread key: the session id, or the shared no-session sentinel.
    pub fn session_key(&self) -> &str {
        self.session_id.as_deref().unwrap_or(NO_SESSION_KEY)
    }

    /// True when the `type` discriminator was not recognised.
    pub fn is_unknown(&self) -> bool {
        matches!(self.payload, EntryPayload::Unknown(_))
    }

    /// Raw discriminator of an unknown entry, for diagnostics.
    pub fn raw_discriminator(&self) -> Option<&str> {
        match &self.payload {
            EntryPayload::Unknown(raw) => raw.get("type").and_then(Value::as_str),
            EntryPayload::Known(_) => Some(self.entry_type.label()),
        }
    }

    /// All textual content joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Refine the discriminator using content shape: the agent records tool
/// results as `user` lines and tool calls as `assistant` lines.
fn classify(discriminator: Option<&str>, content: &[ContentBlock]) -> EntryType {
    let base = discriminator
        .map(EntryType::from_discriminator)
        .unwrap_or_default();
    match base {
        EntryType::User if !content.is_empty() && content.iter().all(ContentBlock::is_tool_result) => {
            EntryType::ToolResult
        }
        EntryType::Assistant if !content.is_empty() && content.iter().all(ContentBlock::is_tool_use) => {
            EntryType::ToolCall
        }
        other => other,
    }
}

fn known_fields(object: &Map<String, Value>, message: Option<&Map<String, Value>>) -> KnownFields {
    let mut extra: Map<String, Value> = object
        .iter()
        .filter(|(k, _)| !MODELLED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(message) = message {
        let leftover: Map<String, Value> = message
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), "role" | "model" | "content"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !leftover.is_empty() {
            extra.insert("message".to_string(), Value::Object(leftover));
        }
    }

    KnownFields {
        role: message.and_then(|m| str_field(m, "role")),
        model: message.and_then(|m| str_field(m, "model")),
        cwd: str_field(object, "cwd"),
        git_branch: str_field_any(object, &["gitBranch", "git_branch"]),
        version: str_field(object, "version"),
        request_id: str_field_any(object, &["requestId", "request_id"]),
        is_sidechain: ["isSidechain", "is_sidechain"]
            .iter()
            .find_map(|k| object.get(*k).and_then(Value::as_bool))
            .unwrap_or(false),
        extra,
    }
}

/// Timestamps arrive as RFC 3339 strings or Unix milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn str_field_any(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| str_field(obj, k))
}
