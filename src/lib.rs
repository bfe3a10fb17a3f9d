// SessionTail - lib.rs
//
// Library entry point. The binary in `main.rs` is a thin CLI over the same
// surface used by integration tests and embedding applications.

pub mod app;
pub mod core;
pub mod platform;
pub mod util;

pub use app::checkpoint::OffsetCheckpoint;
pub use app::dispatch::{
    DispatchConfig, DispatchEvent, DropPolicy, EntrySink, MonitorNotice, SubscriptionId,
    ThreadSource,
};
pub use app::file_state::FileState;
pub use app::monitor::{
    start_monitoring, FileMonitor, MonitorConfig, MonitorHandle, StatisticsReport,
};
pub use core::conversation::{ConversationBuilder, ConversationThread};
pub use core::model::{ContentBlock, Entry, EntryPayload, EntryType};
pub use core::parser::{FeedResult, ParseConfig, StreamingParser};
pub use core::stats::ParseCounters;
pub use util::error::{ConfigError, ParseError, SessionTailError};
