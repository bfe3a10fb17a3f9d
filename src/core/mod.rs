// SessionTail - core/mod.rs
//
// Core pipeline logic: entry model, streaming parser, parse statistics and
// thread building.
// Dependencies: serde, serde_json, chrono, tracing.
// Must NOT depend on: app, platform, or the filesystem.

pub mod conversation;
pub mod model;
pub mod parser;
pub mod stats;
