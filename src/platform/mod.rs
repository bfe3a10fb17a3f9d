// SessionTail - platform/mod.rs
//
// Platform layer: filesystem primitives, platform directories and
// config.toml loading.
// Dependencies: standard library, directories, toml; config loading also
// builds app::monitor::MonitorConfig.

pub mod config;
pub mod fs;
